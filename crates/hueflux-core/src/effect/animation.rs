// ── Animations ──
//
// A value over time. `Constant` never changes; `Curve` interpolates
// linearly between control points, wraps around while repeats remain and
// then holds its last value.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Control point: `t` in milliseconds from the start of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub t: f64,
    pub value: f64,
}

impl Point {
    pub const fn new(t: f64, value: f64) -> Self {
        Self { t, value }
    }
}

/// Post-processing applied to interpolated curve values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveOptions {
    pub multiply: f64,
    pub clip_min: Option<f64>,
    pub clip_max: Option<f64>,
}

impl Default for CurveOptions {
    fn default() -> Self {
        Self {
            multiply: 1.0,
            clip_min: None,
            clip_max: None,
        }
    }
}

impl CurveOptions {
    fn apply(&self, v: f64) -> f64 {
        let mut v = v * self.multiply;
        if let Some(min) = self.clip_min {
            v = v.max(min);
        }
        if let Some(max) = self.clip_max {
            v = v.min(max);
        }
        v
    }
}

/// How many extra passes a curve plays after the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repeat {
    Times(u32),
    Forever,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    points: Vec<Point>,
    repeat: Repeat,
    options: CurveOptions,
}

impl Curve {
    /// Points are sorted by time; an empty curve evaluates to `0`.
    pub fn new(mut points: Vec<Point>, repeat: Repeat) -> Self {
        points.sort_by(|a, b| a.t.total_cmp(&b.t));
        Self {
            points,
            repeat,
            options: CurveOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CurveOptions) -> Self {
        self.options = options;
        self
    }

    /// Duration of one pass in milliseconds.
    pub fn pass_length(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => last.t - first.t,
            _ => 0.0,
        }
    }

    /// Total duration, `None` when repeating forever.
    pub fn length(&self) -> Option<Duration> {
        match self.repeat {
            Repeat::Forever => None,
            Repeat::Times(n) => {
                let total = self.pass_length() * (f64::from(n) + 1.0);
                Duration::try_from_secs_f64(total.max(0.0) / 1000.0).ok()
            }
        }
    }

    pub fn value_at(&self, elapsed: Duration) -> f64 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0.0;
        };
        let pass = self.pass_length();
        if pass <= 0.0 {
            return self.options.apply(first.value);
        }

        let ms = elapsed.as_secs_f64() * 1000.0;
        let passes_done = (ms / pass).floor();
        let exhausted = match self.repeat {
            Repeat::Forever => false,
            Repeat::Times(n) => passes_done > f64::from(n),
        };
        if exhausted {
            return self.options.apply(last.value);
        }
        let local = first.t + (ms - passes_done * pass);
        self.options.apply(self.interpolate(local))
    }

    fn interpolate(&self, t: f64) -> f64 {
        let idx = self.points.partition_point(|p| p.t <= t);
        let before = idx.checked_sub(1).and_then(|i| self.points.get(i));
        match (before, self.points.get(idx)) {
            (Some(a), Some(b)) if b.t > a.t => {
                a.value + (b.value - a.value) * (t - a.t) / (b.t - a.t)
            }
            (Some(a), _) => a.value,
            (None, Some(b)) => b.value,
            (None, None) => 0.0,
        }
    }
}

/// Value source for one effect channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Animation {
    Constant(f64),
    Curve(Curve),
}

impl Default for Animation {
    fn default() -> Self {
        Self::Constant(0.0)
    }
}

impl From<f64> for Animation {
    fn from(v: f64) -> Self {
        Self::Constant(v)
    }
}

impl From<Curve> for Animation {
    fn from(c: Curve) -> Self {
        Self::Curve(c)
    }
}

impl Animation {
    pub fn value_at(&self, elapsed: Duration) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Curve(c) => c.value_at(elapsed),
        }
    }

    /// `None` for animations that never end.
    pub fn length(&self) -> Option<Duration> {
        match self {
            Self::Constant(_) => None,
            Self::Curve(c) => c.length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn ramp(repeat: Repeat) -> Curve {
        Curve::new(vec![Point::new(0.0, 0.0), Point::new(1000.0, 1.0)], repeat)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn constant_is_constant() {
        let a = Animation::Constant(0.4);
        assert!(close(a.value_at(ms(0)), 0.4));
        assert!(close(a.value_at(ms(99_999)), 0.4));
        assert_eq!(a.length(), None);
    }

    #[test]
    fn curve_interpolates_linearly() {
        let c = ramp(Repeat::Times(0));
        assert!(close(c.value_at(ms(0)), 0.0));
        assert!(close(c.value_at(ms(250)), 0.25));
        assert!(close(c.value_at(ms(999)), 0.999));
    }

    #[test]
    fn curve_wraps_while_repeats_remain_then_holds() {
        let c = ramp(Repeat::Times(1));
        assert!(close(c.value_at(ms(1250)), 0.25));
        assert!(close(c.value_at(ms(2500)), 1.0));
        assert!(close(c.value_at(ms(60_000)), 1.0));
        assert_eq!(c.length(), Some(ms(2000)));
    }

    #[test]
    fn forever_keeps_wrapping() {
        let c = ramp(Repeat::Forever);
        assert!(close(c.value_at(ms(100_500)), 0.5));
        assert_eq!(c.length(), None);
    }

    #[test]
    fn options_multiply_then_clip() {
        let c = ramp(Repeat::Times(0)).with_options(CurveOptions {
            multiply: 2.0,
            clip_min: Some(0.2),
            clip_max: Some(1.5),
        });
        assert!(close(c.value_at(ms(0)), 0.2));
        assert!(close(c.value_at(ms(500)), 1.0));
        assert!(close(c.value_at(ms(900)), 1.5));
    }

    #[test]
    fn unsorted_points_are_ordered() {
        let c = Curve::new(
            vec![Point::new(1000.0, 1.0), Point::new(0.0, 0.0)],
            Repeat::Times(0),
        );
        assert!(close(c.value_at(ms(500)), 0.5));
    }

    #[test]
    fn single_point_and_empty_curves() {
        let single = Curve::new(vec![Point::new(0.0, 0.7)], Repeat::Forever);
        assert!(close(single.value_at(ms(123)), 0.7));
        let empty = Curve::new(Vec::new(), Repeat::Forever);
        assert!(close(empty.value_at(ms(123)), 0.0));
    }
}
