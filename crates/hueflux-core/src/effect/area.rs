// ── Cuboid areas ──
//
// Axis-aligned boxes in the [-1, 1]^3 entertainment space. x is
// left/right, y back/front, z bottom/top.

use serde::{Deserialize, Serialize};

use crate::model::Location;

const THIRD: f64 = 1.0 / 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub min: Location,
    pub max: Location,
    /// Match everything outside the box instead of inside.
    #[serde(default)]
    pub inverted: bool,
}

impl Area {
    pub const ALL: Self = Self::cuboid(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0);
    pub const FRONT: Self = Self::cuboid(-1.0, 1.0, 0.0, 1.0, -1.0, 1.0);
    pub const BACK: Self = Self::cuboid(-1.0, 1.0, -1.0, 0.0, -1.0, 1.0);
    pub const LEFT: Self = Self::cuboid(-1.0, -THIRD, -1.0, 1.0, -1.0, 1.0);
    pub const CENTER: Self = Self::cuboid(-THIRD, THIRD, -1.0, 1.0, -1.0, 1.0);
    pub const RIGHT: Self = Self::cuboid(THIRD, 1.0, -1.0, 1.0, -1.0, 1.0);
    pub const TOP: Self = Self::cuboid(-1.0, 1.0, -1.0, 1.0, THIRD, 1.0);
    pub const BOTTOM: Self = Self::cuboid(-1.0, 1.0, -1.0, 1.0, -1.0, -THIRD);
    pub const FRONT_LEFT: Self = Self::cuboid(-1.0, -THIRD, 0.0, 1.0, -1.0, 1.0);
    pub const FRONT_CENTER: Self = Self::cuboid(-THIRD, THIRD, 0.0, 1.0, -1.0, 1.0);
    pub const FRONT_RIGHT: Self = Self::cuboid(THIRD, 1.0, 0.0, 1.0, -1.0, 1.0);
    pub const BACK_LEFT: Self = Self::cuboid(-1.0, -THIRD, -1.0, 0.0, -1.0, 1.0);
    pub const BACK_CENTER: Self = Self::cuboid(-THIRD, THIRD, -1.0, 0.0, -1.0, 1.0);
    pub const BACK_RIGHT: Self = Self::cuboid(THIRD, 1.0, -1.0, 0.0, -1.0, 1.0);

    pub const fn cuboid(
        left: f64,
        right: f64,
        back: f64,
        front: f64,
        bottom: f64,
        top: f64,
    ) -> Self {
        Self {
            min: Location::new(left, back, bottom),
            max: Location::new(right, front, top),
            inverted: false,
        }
    }

    /// Box between two arbitrary opposite corners.
    pub fn between(a: Location, b: Location) -> Self {
        Self {
            min: Location::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Location::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
            inverted: false,
        }
    }

    pub const fn inverted(mut self) -> Self {
        self.inverted = !self.inverted;
        self
    }

    pub fn contains(&self, p: &Location) -> bool {
        let inside = (self.min.x..=self.max.x).contains(&p.x)
            && (self.min.y..=self.max.y).contains(&p.y)
            && (self.min.z..=self.max.z).contains(&p.z);
        inside != self.inverted
    }
}
