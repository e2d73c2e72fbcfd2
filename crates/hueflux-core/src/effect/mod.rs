// ── Effects ──
//
// An effect is a shared record (id, layer, fade window) plus a tagged
// `EffectKind` that decides how much color it contributes to each light.
// Lifecycle phases are owned by the mixer.

pub mod animation;
pub mod area;
pub mod color;
pub mod mixer;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{Light, Location};

pub use animation::{Animation, Curve, CurveOptions, Point, Repeat};
pub use area::Area;
pub use color::Color;
pub use mixer::{Frame, LightColor, Mixer, MixerGuard};

/// Caller-chosen effect name, unique within a mixer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectId(String);

impl EffectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EffectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EffectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for EffectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
pub enum Phase {
    /// Added but not enabled; renders nothing.
    Created,
    Enabled,
    /// Fading out after `finish`.
    Finishing,
    /// Done; pruned on the next lock.
    Finished,
}

/// Four animations producing an RGBA color.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorChannels {
    pub r: Animation,
    pub g: Animation,
    pub b: Animation,
    pub a: Animation,
}

impl ColorChannels {
    pub fn constant(c: Color) -> Self {
        Self {
            r: c.r.into(),
            g: c.g.into(),
            b: c.b.into(),
            a: c.a.into(),
        }
    }

    pub fn value_at(&self, t: Duration) -> Color {
        Color::rgba(
            self.r.value_at(t),
            self.g.value_at(t),
            self.b.value_at(t),
            self.a.value_at(t),
        )
    }
}

/// Per-variant channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EffectKind {
    /// Uniform color on every light inside any of `areas`.
    Area {
        areas: Vec<Area>,
        color: ColorChannels,
    },
    /// Color radiating from a moving point, fading with distance.
    LightSource {
        x: Animation,
        y: Animation,
        z: Animation,
        radius: Animation,
        color: ColorChannels,
    },
    /// Light source whose radius grows to `max_radius` over `duration`
    /// while its intensity decays to zero.
    Explosion {
        origin: Location,
        color: Color,
        max_radius: f64,
        duration: Duration,
    },
}

impl EffectKind {
    /// Contribution to `light` at `t` after enabling; alpha 0 means none.
    pub fn contribution(&self, light: &Light, t: Duration) -> Color {
        match self {
            Self::Area { areas, color } => {
                if areas.iter().any(|a| a.contains(&light.position)) {
                    color.value_at(t)
                } else {
                    Color::TRANSPARENT
                }
            }
            Self::LightSource {
                x,
                y,
                z,
                radius,
                color,
            } => {
                let source = Location::new(x.value_at(t), y.value_at(t), z.value_at(t));
                let c = color.value_at(t);
                let reach = falloff(source.distance(&light.position), radius.value_at(t));
                c.with_alpha(c.a * reach)
            }
            Self::Explosion {
                origin,
                color,
                max_radius,
                duration,
            } => {
                let progress = progress(t, *duration);
                let reach = falloff(origin.distance(&light.position), max_radius * progress);
                color.with_alpha(color.a * (1.0 - progress) * reach)
            }
        }
    }

    /// Time after which the effect ends on its own.
    pub fn natural_end(&self) -> Option<Duration> {
        match self {
            Self::Explosion { duration, .. } => Some(*duration),
            Self::Area { .. } | Self::LightSource { .. } => None,
        }
    }
}

/// `1 - (d/r)^2` inside the radius, 0 outside.
fn falloff(distance: f64, radius: f64) -> f64 {
    if radius <= 0.0 || distance >= radius {
        return 0.0;
    }
    let q = distance / radius;
    1.0 - q * q
}

fn progress(t: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 1.0;
    }
    (t.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
}

// ── Effect record ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub id: EffectId,
    /// Higher layers are composed later and win.
    pub layer: u32,
    pub kind: EffectKind,
    /// Enable as soon as the effect is committed.
    pub enabled: bool,
    /// How long a finished effect keeps fading before it is dropped.
    pub fade_out: Duration,
}

impl Effect {
    pub fn new(id: impl Into<EffectId>, layer: u32, kind: EffectKind) -> Self {
        Self {
            id: id.into(),
            layer,
            kind,
            enabled: true,
            fade_out: Duration::ZERO,
        }
    }

    /// Fixed color over `areas`.
    pub fn area(id: impl Into<EffectId>, layer: u32, areas: Vec<Area>, color: Color) -> Self {
        Self::new(
            id,
            layer,
            EffectKind::Area {
                areas,
                color: ColorChannels::constant(color),
            },
        )
    }

    /// Stationary light source.
    pub fn light_source(
        id: impl Into<EffectId>,
        layer: u32,
        position: Location,
        radius: f64,
        color: Color,
    ) -> Self {
        Self::new(
            id,
            layer,
            EffectKind::LightSource {
                x: position.x.into(),
                y: position.y.into(),
                z: position.z.into(),
                radius: radius.into(),
                color: ColorChannels::constant(color),
            },
        )
    }

    pub fn explosion(
        id: impl Into<EffectId>,
        layer: u32,
        origin: Location,
        color: Color,
        max_radius: f64,
        duration: Duration,
    ) -> Self {
        Self::new(
            id,
            layer,
            EffectKind::Explosion {
                origin,
                color,
                max_radius,
                duration,
            },
        )
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_fade_out(mut self, fade_out: Duration) -> Self {
        self.fade_out = fade_out;
        self
    }
}
