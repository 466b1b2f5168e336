//! Non-curve channel drivers and vertex caches evaluated by [`MemoryScene`].
//!
//! [`MemoryScene`]: super::MemoryScene

use std::collections::BTreeMap;

use bakeshift_math::{DVec3, Frame};
use serde::{Deserialize, Serialize};

/// A procedural channel driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Expression {
    /// `offset + rate * frame`
    Linear { rate: f64, offset: f64 },

    /// `offset + amplitude * sin(2π * frame / period + phase)`
    Sine {
        amplitude: f64,
        period: f64,
        #[serde(default)]
        phase: f64,
        #[serde(default)]
        offset: f64,
    },
}

impl Expression {
    pub fn evaluate(&self, frame: Frame) -> f64 {
        let frame = f64::from(frame);
        match *self {
            Expression::Linear { rate, offset } => offset + rate * frame,
            Expression::Sine {
                amplitude,
                period,
                phase,
                offset,
            } => {
                if period == 0.0 {
                    return offset;
                }
                offset + amplitude * (std::f64::consts::TAU * frame / period + phase).sin()
            }
        }
    }
}

/// Per-frame samples of a single channel, as read from an external cache file.
///
/// Frames between samples hold the nearest earlier sample.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformCache {
    pub samples: BTreeMap<Frame, f64>,
}

impl TransformCache {
    pub fn sample(&self, frame: Frame) -> Option<f64> {
        self.samples
            .range(..=frame)
            .next_back()
            .or_else(|| self.samples.iter().next())
            .map(|(_, value)| *value)
    }
}

/// Per-frame local-space vertex positions for one mesh.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VertexCache {
    pub frames: BTreeMap<Frame, Vec<DVec3>>,
}

impl VertexCache {
    /// Positions for `frame`, holding the nearest earlier cached frame.
    pub fn positions(&self, frame: Frame) -> Option<&[DVec3]> {
        self.frames
            .range(..=frame)
            .next_back()
            .or_else(|| self.frames.iter().next())
            .map(|(_, positions)| positions.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_expression() {
        let expr = Expression::Linear {
            rate: 2.0,
            offset: 1.0,
        };
        assert_eq!(expr.evaluate(3), 7.0);
    }

    #[test]
    fn test_sine_expression_zero_period() {
        let expr = Expression::Sine {
            amplitude: 4.0,
            period: 0.0,
            phase: 0.0,
            offset: 2.0,
        };
        assert_eq!(expr.evaluate(10), 2.0);
    }

    #[test]
    fn test_transform_cache_holds_previous_sample() {
        let cache = TransformCache {
            samples: [(1, 10.0), (5, 50.0)].into_iter().collect(),
        };
        assert_eq!(cache.sample(0), Some(10.0));
        assert_eq!(cache.sample(3), Some(10.0));
        assert_eq!(cache.sample(5), Some(50.0));
        assert_eq!(cache.sample(9), Some(50.0));
    }

    #[test]
    fn test_vertex_cache_lookup() {
        let cache = VertexCache {
            frames: [(1, vec![DVec3::ZERO]), (2, vec![DVec3::X])]
                .into_iter()
                .collect(),
        };
        assert_eq!(cache.positions(2), Some(&[DVec3::X][..]));
        assert_eq!(cache.positions(-4), Some(&[DVec3::ZERO][..]));
    }
}
