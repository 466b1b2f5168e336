//! Keyframe curves.

use serde::{Deserialize, Serialize};

/// How a curve leaves a key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tangent {
    /// Interpolate straight to the next key
    #[default]
    Linear,

    /// Hold this key's value until the next key
    Step,
}

/// A single key on a curve.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub frame: f64,
    pub value: f64,

    #[serde(default)]
    pub out_tangent: Tangent,
}

impl Key {
    pub fn new(frame: f64, value: f64, out_tangent: Tangent) -> Self {
        Self {
            frame,
            value,
            out_tangent,
        }
    }

    pub fn linear(frame: f64, value: f64) -> Self {
        Self::new(frame, value, Tangent::Linear)
    }

    pub fn step(frame: f64, value: f64) -> Self {
        Self::new(frame, value, Tangent::Step)
    }
}

/// A keyframe curve. Keys are kept sorted by frame with at most one key per frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnimCurve {
    keys: Vec<Key>,
}

impl AnimCurve {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a curve from keys in any order; later duplicates win.
    pub fn from_keys(keys: impl IntoIterator<Item = Key>) -> Self {
        let mut curve = Self::new();
        for key in keys {
            curve.set_key(key);
        }
        curve
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Insert a key, replacing any key already on that frame.
    pub fn set_key(&mut self, key: Key) {
        match self
            .keys
            .binary_search_by(|existing| existing.frame.total_cmp(&key.frame))
        {
            Ok(index) => self.keys[index] = key,
            Err(index) => self.keys.insert(index, key),
        }
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Evaluate the curve. Values are held flat before the first and after the last key.
    pub fn evaluate(&self, frame: f64) -> Option<f64> {
        let first = self.keys.first()?;
        if frame <= first.frame {
            return Some(first.value);
        }

        // Index of the first key strictly after `frame`
        let upper = self.keys.partition_point(|key| key.frame <= frame);
        if upper == self.keys.len() {
            return self.keys.last().map(|key| key.value);
        }

        let left = &self.keys[upper - 1];
        let right = &self.keys[upper];
        match left.out_tangent {
            Tangent::Step => Some(left.value),
            Tangent::Linear => {
                let t = (frame - left.frame) / (right.frame - left.frame);
                Some(left.value + (right.value - left.value) * t)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_curve_has_no_value() {
        assert_eq!(AnimCurve::new().evaluate(1.0), None);
    }

    #[test]
    fn test_linear_interpolation() {
        let curve = AnimCurve::from_keys([Key::linear(0.0, 0.0), Key::linear(10.0, 5.0)]);
        assert_eq!(curve.evaluate(4.0), Some(2.0));
        assert_eq!(curve.evaluate(-3.0), Some(0.0));
        assert_eq!(curve.evaluate(12.0), Some(5.0));
    }

    #[test]
    fn test_step_holds_value() {
        let curve = AnimCurve::from_keys([Key::step(1.0, 1.0), Key::step(2.0, 0.0)]);
        assert_eq!(curve.evaluate(1.0), Some(1.0));
        assert_eq!(curve.evaluate(1.99), Some(1.0));
        assert_eq!(curve.evaluate(2.0), Some(0.0));
    }

    #[test]
    fn test_keys_stay_sorted_and_unique() {
        let mut curve = AnimCurve::from_keys([Key::linear(5.0, 1.0), Key::linear(1.0, 2.0)]);
        curve.set_key(Key::step(5.0, 3.0));

        let frames: Vec<f64> = curve.keys().iter().map(|key| key.frame).collect();
        assert_eq!(frames, vec![1.0, 5.0]);
        assert_eq!(curve.keys()[1].value, 3.0);
        assert_eq!(curve.keys()[1].out_tangent, Tangent::Step);
    }
}
