use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A frame number on the host timeline.
pub type Frame = i32;

/// Errors produced when constructing a [`BakeRange`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    #[error("end frame {end} is before start frame {start}")]
    Inverted { start: Frame, end: Frame },
}

/// An inclusive integer frame interval `[start, end]`.
///
/// Every bake, sample and morph-target loop walks one of these in order.
/// A range always holds at least one frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(Frame, Frame)", into = "(Frame, Frame)")]
pub struct BakeRange {
    start: Frame,
    end: Frame,
}

impl BakeRange {
    /// Create a range, rejecting `end < start`.
    pub fn new(start: Frame, end: Frame) -> Result<Self, RangeError> {
        if end < start {
            return Err(RangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// A range covering exactly one frame.
    pub fn single(frame: Frame) -> Self {
        Self {
            start: frame,
            end: frame,
        }
    }

    #[inline]
    pub fn start(&self) -> Frame {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Frame {
        self.end
    }

    /// Number of frames in the range (never zero).
    pub fn frame_count(&self) -> usize {
        (i64::from(self.end) - i64::from(self.start) + 1) as usize
    }

    /// Returns true if `frame` lies within `[start, end]`.
    pub fn contains(&self, frame: Frame) -> bool {
        self.start <= frame && frame <= self.end
    }

    /// Iterate the frames in ascending order.
    pub fn frames(&self) -> RangeInclusive<Frame> {
        self.start..=self.end
    }

    /// Index of `frame` relative to `start`, if it is inside the range.
    pub fn index_of(&self, frame: Frame) -> Option<usize> {
        self.contains(frame)
            .then(|| (i64::from(frame) - i64::from(self.start)) as usize)
    }

    /// Frame at `index` relative to `start`, if it is inside the range.
    pub fn frame_at(&self, index: usize) -> Option<Frame> {
        let frame = i64::from(self.start) + index as i64;
        if frame <= i64::from(self.end) {
            Some(frame as Frame)
        } else {
            None
        }
    }

    /// The smallest range that contains both this range and `frame`.
    ///
    /// Used to pull an auxiliary reference-pose frame into a skeletal bake.
    pub fn widened_to(&self, frame: Frame) -> Self {
        Self {
            start: self.start.min(frame),
            end: self.end.max(frame),
        }
    }
}

impl TryFrom<(Frame, Frame)> for BakeRange {
    type Error = RangeError;

    fn try_from((start, end): (Frame, Frame)) -> Result<Self, Self::Error> {
        Self::new(start, end)
    }
}

impl From<BakeRange> for (Frame, Frame) {
    fn from(range: BakeRange) -> Self {
        (range.start, range.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_creation() {
        let range = BakeRange::new(1, 10).unwrap();
        assert_eq!(range.start(), 1);
        assert_eq!(range.end(), 10);
        assert_eq!(range.frame_count(), 10);
    }

    #[test]
    fn test_range_rejects_inverted() {
        assert_eq!(
            BakeRange::new(10, 1),
            Err(RangeError::Inverted { start: 10, end: 1 })
        );
    }

    #[test]
    fn test_single_frame_range() {
        let range = BakeRange::single(7);
        assert_eq!(range.frame_count(), 1);
        assert_eq!(range.frames().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_index_mapping() {
        let range = BakeRange::new(-2, 3).unwrap();
        assert_eq!(range.index_of(-2), Some(0));
        assert_eq!(range.index_of(3), Some(5));
        assert_eq!(range.index_of(4), None);
        assert_eq!(range.frame_at(5), Some(3));
        assert_eq!(range.frame_at(6), None);
    }

    #[test]
    fn test_widen_to_reference_frame() {
        let range = BakeRange::new(1, 100).unwrap();
        assert_eq!(range.widened_to(0), BakeRange::new(0, 100).unwrap());
        assert_eq!(range.widened_to(50), range);
        assert_eq!(range.widened_to(120).end(), 120);
    }

    #[test]
    fn test_range_deserialize_validates() {
        let range: BakeRange = serde_json::from_str("[1, 24]").unwrap();
        assert_eq!(range.frame_count(), 24);
        assert!(serde_json::from_str::<BakeRange>("[24, 1]").is_err());
    }
}
