// ── Entertainment groups and lights ──

use serde::{Deserialize, Serialize};

use hueflux_api::{EntertainmentGroup, GroupLightState};

/// Point in the normalized entertainment space.
///
/// `x` runs left (-1) to right (1), `y` back (-1) to front (1),
/// `z` bottom (-1) to top (1).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Location) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Coarse position tag derived from a light's coordinates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
pub enum LightPosition {
    FrontLeft,
    FrontCenter,
    FrontRight,
    BackLeft,
    BackCenter,
    BackRight,
}

impl LightPosition {
    pub fn from_location(loc: &Location) -> Self {
        const THIRD: f64 = 1.0 / 3.0;
        let front = loc.y >= 0.0;
        match (front, loc.x) {
            (true, x) if x < -THIRD => Self::FrontLeft,
            (true, x) if x > THIRD => Self::FrontRight,
            (true, _) => Self::FrontCenter,
            (false, x) if x < -THIRD => Self::BackLeft,
            (false, x) if x > THIRD => Self::BackRight,
            (false, _) => Self::BackCenter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub id: String,
    pub position: Location,
    pub tag: LightPosition,
}

impl Light {
    pub fn new(id: impl Into<String>, position: Location) -> Self {
        Self {
            id: id.into(),
            tag: LightPosition::from_location(&position),
            position,
        }
    }
}

/// An entertainment group: the unit that gets streamed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub class: Option<String>,
    pub lights: Vec<Light>,
    /// Application currently streaming to this group, if any.
    #[serde(default, skip_serializing)]
    pub stream_owner: Option<String>,
    #[serde(default, skip_serializing)]
    pub stream_active: bool,
    /// On/brightness outside of streaming; only known after a live read.
    #[serde(skip)]
    pub light_state: Option<GroupLightState>,
}

impl Group {
    pub fn new(id: impl Into<String>, name: impl Into<String>, lights: Vec<Light>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            class: None,
            lights,
            stream_owner: None,
            stream_active: false,
            light_state: None,
        }
    }

    /// Whether `user` holds the group's stream.
    pub fn streamed_by(&self, user: &str) -> bool {
        self.stream_active && self.stream_owner.as_deref() == Some(user)
    }
}

impl From<EntertainmentGroup> for Group {
    fn from(g: EntertainmentGroup) -> Self {
        Self {
            id: g.id,
            name: g.name,
            class: g.class,
            lights: g
                .lights
                .into_iter()
                .map(|l| Light::new(l.id, Location::new(l.x, l.y, l.z)))
                .collect(),
            stream_owner: g.stream_owner,
            stream_active: g.stream_active,
            light_state: g.light_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_tags_follow_thirds() {
        assert_eq!(
            LightPosition::from_location(&Location::new(-0.9, 0.5, 0.0)),
            LightPosition::FrontLeft
        );
        assert_eq!(
            LightPosition::from_location(&Location::new(0.1, -0.5, 0.0)),
            LightPosition::BackCenter
        );
        assert_eq!(
            LightPosition::from_location(&Location::new(0.8, -1.0, 0.0)),
            LightPosition::BackRight
        );
    }
}
