// ── Effect mixer ──
//
// Writers mutate a private copy of the active set through a `MixerGuard`
// and publish it in one atomic swap when the guard is released. `tick`
// only ever loads the last published set, so it never waits on a writer
// and never sees a half-applied batch.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::trace;

use super::{Color, Effect, EffectId, Phase};
use crate::model::{Group, Light};

// ── Frames ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LightColor {
    pub id: String,
    pub color: Color,
}

/// Output of one tick.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Mixer clock at render time.
    pub elapsed: Duration,
    /// Composed color per light, in group order.
    pub lights: Vec<LightColor>,
    /// Effects that contributed, in composition order.
    pub effects: Vec<EffectId>,
    /// Version of the committed effect set this frame was rendered from.
    pub generation: u64,
}

impl Frame {
    pub fn color_of(&self, light_id: &str) -> Option<Color> {
        self.lights
            .iter()
            .find(|l| l.id == light_id)
            .map(|l| l.color)
    }
}

// ── Active set ───────────────────────────────────────────────────────

struct Entry {
    effect: Effect,
    seq: u64,
    enabled_at: Option<Duration>,
    finish_at: Option<Duration>,
    /// Last phase observed by `tick`.
    observed: AtomicU8,
}

impl Entry {
    fn new(effect: Effect, seq: u64, now: Duration) -> Self {
        let enabled_at = effect.enabled.then_some(now);
        Self {
            effect,
            seq,
            enabled_at,
            finish_at: None,
            observed: AtomicU8::new(encode_phase(Phase::Created)),
        }
    }

    fn edited(&self, edit: impl FnOnce(&mut Option<Duration>, &mut Option<Duration>)) -> Self {
        let mut enabled_at = self.enabled_at;
        let mut finish_at = self.finish_at;
        edit(&mut enabled_at, &mut finish_at);
        Self {
            effect: self.effect.clone(),
            seq: self.seq,
            enabled_at,
            finish_at,
            observed: AtomicU8::new(self.observed.load(Ordering::Relaxed)),
        }
    }

    fn phase_at(&self, now: Duration) -> Phase {
        let Some(enabled_at) = self.enabled_at else {
            return if self.finish_at.is_some() {
                Phase::Finished
            } else {
                Phase::Created
            };
        };
        if let Some(end) = self.effect.kind.natural_end() {
            if now.saturating_sub(enabled_at) >= end {
                return Phase::Finished;
            }
        }
        match self.finish_at {
            Some(at) if now >= at + self.effect.fade_out => Phase::Finished,
            Some(_) => Phase::Finishing,
            None => Phase::Enabled,
        }
    }

    /// Intensity multiplier while fading out.
    fn fade_at(&self, now: Duration) -> f64 {
        match self.finish_at {
            Some(at) if !self.effect.fade_out.is_zero() => {
                let gone = now.saturating_sub(at).as_secs_f64();
                (1.0 - gone / self.effect.fade_out.as_secs_f64()).clamp(0.0, 1.0)
            }
            Some(_) => 0.0,
            None => 1.0,
        }
    }
}

#[derive(Default)]
struct ActiveSet {
    generation: u64,
    /// Sorted by (layer, insertion order).
    entries: Vec<Arc<Entry>>,
}

// ── Mixer ────────────────────────────────────────────────────────────

pub struct Mixer {
    committed: ArcSwap<ActiveSet>,
    lights: ArcSwap<Vec<Light>>,
    writer: Mutex<()>,
    clock_us: AtomicU64,
    next_seq: AtomicU64,
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = self.committed.load();
        f.debug_struct("Mixer")
            .field("generation", &set.generation)
            .field("effects", &set.entries.len())
            .field("lights", &self.lights.load().len())
            .field("elapsed", &self.now())
            .finish()
    }
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            committed: ArcSwap::from_pointee(ActiveSet::default()),
            lights: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            clock_us: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Target the lights of `group`.
    pub fn set_group(&self, group: &Group) {
        self.set_lights(group.lights.clone());
    }

    pub fn set_lights(&self, lights: Vec<Light>) {
        self.lights.store(Arc::new(lights));
    }

    pub fn lights(&self) -> Arc<Vec<Light>> {
        self.lights.load_full()
    }

    /// Mixer clock: total time passed to `tick`.
    pub fn now(&self) -> Duration {
        Duration::from_micros(self.clock_us.load(Ordering::Acquire))
    }

    /// Acquire exclusive write access to the active set. Finished effects
    /// are pruned here; changes publish when the guard is dropped.
    pub fn lock(&self) -> MixerGuard<'_> {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.now();
        let current = self.committed.load_full();
        let mut working = current.entries.clone();
        let before = working.len();
        working.retain(|e| e.phase_at(now) != Phase::Finished);
        let pruned = before - working.len();
        if pruned > 0 {
            trace!(pruned, "dropping finished effects");
        }
        MixerGuard {
            mixer: self,
            _writer: writer,
            working,
            generation: current.generation,
            dirty: pruned > 0,
        }
    }

    /// Advance the clock by `delta` and compose a frame. Lock-free.
    pub fn tick(&self, delta: Duration) -> Frame {
        let step = u64::try_from(delta.as_micros()).unwrap_or(u64::MAX);
        let now_us = self
            .clock_us
            .fetch_add(step, Ordering::AcqRel)
            .saturating_add(step);
        let now = Duration::from_micros(now_us);

        let set = self.committed.load_full();
        let lights = self.lights.load_full();

        let mut live: Vec<(&Entry, Duration, f64)> = Vec::with_capacity(set.entries.len());
        for entry in &set.entries {
            let phase = entry.phase_at(now);
            entry.observed.store(encode_phase(phase), Ordering::Relaxed);
            if let (Phase::Enabled | Phase::Finishing, Some(enabled_at)) = (phase, entry.enabled_at)
            {
                live.push((entry.as_ref(), now.saturating_sub(enabled_at), entry.fade_at(now)));
            }
        }

        let lights = lights
            .iter()
            .map(|light| {
                let color = live.iter().fold(Color::BLACK, |acc, (entry, t, fade)| {
                    let c = entry.effect.kind.contribution(light, *t);
                    acc.blend_over(c.with_alpha(c.a * fade))
                });
                LightColor {
                    id: light.id.clone(),
                    color,
                }
            })
            .collect();

        Frame {
            elapsed: now,
            lights,
            effects: live.iter().map(|(e, _, _)| e.effect.id.clone()).collect(),
            generation: set.generation,
        }
    }

    /// Phase of `id` in the committed set at the current clock.
    pub fn phase(&self, id: &EffectId) -> Option<Phase> {
        let now = self.now();
        self.committed
            .load()
            .entries
            .iter()
            .find(|e| &e.effect.id == id)
            .map(|e| e.phase_at(now))
    }

    /// Phase recorded by the most recent `tick`.
    pub fn observed_phase(&self, id: &EffectId) -> Option<Phase> {
        self.committed
            .load()
            .entries
            .iter()
            .find(|e| &e.effect.id == id)
            .map(|e| decode_phase(e.observed.load(Ordering::Relaxed)))
    }

    pub fn effect_count(&self) -> usize {
        self.committed.load().entries.len()
    }

    /// Remove every effect.
    pub fn clear(&self) {
        let mut guard = self.lock();
        guard.clear();
    }
}

// ── Write guard ──────────────────────────────────────────────────────

/// Exclusive handle for batched mutation. Dropping it (or calling
/// [`unlock`](Self::unlock)) publishes all changes at once.
pub struct MixerGuard<'a> {
    mixer: &'a Mixer,
    _writer: MutexGuard<'a, ()>,
    working: Vec<Arc<Entry>>,
    generation: u64,
    dirty: bool,
}

impl MixerGuard<'_> {
    /// Add `effect`, replacing any effect with the same id.
    pub fn add_effect(&mut self, effect: Effect) {
        let now = self.mixer.now();
        let seq = self.mixer.next_seq.fetch_add(1, Ordering::Relaxed);
        self.working.retain(|e| e.effect.id != effect.id);
        self.working.push(Arc::new(Entry::new(effect, seq, now)));
        self.dirty = true;
    }

    /// Returns whether an effect was removed.
    pub fn remove_effect(&mut self, id: &EffectId) -> bool {
        let before = self.working.len();
        self.working.retain(|e| &e.effect.id != id);
        let removed = self.working.len() != before;
        self.dirty |= removed;
        removed
    }

    /// Start the fade-out of `id`. Returns `false` if unknown or already finishing.
    pub fn finish(&mut self, id: &EffectId) -> bool {
        let now = self.mixer.now();
        self.edit(id, |_, finish_at| {
            if finish_at.is_some() {
                return false;
            }
            *finish_at = Some(now);
            true
        })
    }

    /// Enable an effect added with `enabled = false`.
    pub fn enable(&mut self, id: &EffectId) -> bool {
        let now = self.mixer.now();
        self.edit(id, |enabled_at, _| {
            if enabled_at.is_some() {
                return false;
            }
            *enabled_at = Some(now);
            true
        })
    }

    pub fn clear(&mut self) {
        self.dirty |= !self.working.is_empty();
        self.working.clear();
    }

    pub fn contains(&self, id: &EffectId) -> bool {
        self.working.iter().any(|e| &e.effect.id == id)
    }

    /// Ids in the pending set, in composition order once published.
    pub fn effect_ids(&self) -> Vec<EffectId> {
        let mut entries: Vec<&Arc<Entry>> = self.working.iter().collect();
        entries.sort_by_key(|e| (e.effect.layer, e.seq));
        entries.iter().map(|e| e.effect.id.clone()).collect()
    }

    /// Publish and release.
    pub fn unlock(self) {}

    fn edit(
        &mut self,
        id: &EffectId,
        edit: impl FnOnce(&mut Option<Duration>, &mut Option<Duration>) -> bool,
    ) -> bool {
        let Some(slot) = self.working.iter_mut().find(|e| &e.effect.id == id) else {
            return false;
        };
        let mut changed = false;
        let replacement = slot.edited(|enabled_at, finish_at| {
            changed = edit(enabled_at, finish_at);
        });
        if changed {
            *slot = Arc::new(replacement);
            self.dirty = true;
        }
        changed
    }
}

impl Drop for MixerGuard<'_> {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        let mut entries = std::mem::take(&mut self.working);
        entries.sort_by_key(|e| (e.effect.layer, e.seq));
        let generation = self.generation + 1;
        self.mixer.committed.store(Arc::new(ActiveSet {
            generation,
            entries,
        }));
        trace!(generation, "effect set published");
    }
}

const fn encode_phase(phase: Phase) -> u8 {
    match phase {
        Phase::Created => 0,
        Phase::Enabled => 1,
        Phase::Finishing => 2,
        Phase::Finished => 3,
    }
}

const fn decode_phase(raw: u8) -> Phase {
    match raw {
        0 => Phase::Created,
        1 => Phase::Enabled,
        2 => Phase::Finishing,
        _ => Phase::Finished,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Area;
    use crate::model::Location;

    fn mixer_with_two_lights() -> Mixer {
        let mixer = Mixer::new();
        mixer.set_lights(vec![
            Light::new("1", Location::new(-0.8, 0.5, 0.0)),
            Light::new("2", Location::new(0.8, -0.5, 0.0)),
        ]);
        mixer
    }

    const STEP: Duration = Duration::from_millis(20);

    #[test]
    fn later_layer_wins() {
        let mixer = mixer_with_two_lights();
        {
            let mut guard = mixer.lock();
            guard.add_effect(Effect::area("top", 1, vec![Area::ALL], Color::BLUE));
            guard.add_effect(Effect::area("base", 0, vec![Area::ALL], Color::RED));
        }
        for _ in 0..5 {
            let frame = mixer.tick(STEP);
            assert_eq!(frame.color_of("1"), Some(Color::BLUE));
            assert_eq!(frame.color_of("2"), Some(Color::BLUE));
            assert_eq!(frame.effects, vec![EffectId::from("base"), EffectId::from("top")]);
        }
    }

    #[test]
    fn changes_are_invisible_until_unlock() {
        let mixer = mixer_with_two_lights();
        let mut guard = mixer.lock();
        guard.add_effect(Effect::area("a", 0, vec![Area::ALL], Color::GREEN));
        assert!(mixer.tick(STEP).effects.is_empty());
        guard.unlock();
        assert_eq!(mixer.tick(STEP).color_of("1"), Some(Color::GREEN));
    }

    #[test]
    fn same_id_replaces_previous_effect() {
        let mixer = mixer_with_two_lights();
        mixer.lock().add_effect(Effect::area("a", 0, vec![Area::ALL], Color::GREEN));
        mixer.lock().add_effect(Effect::area("a", 0, vec![Area::ALL], Color::RED));
        assert_eq!(mixer.effect_count(), 1);
        assert_eq!(mixer.tick(STEP).color_of("2"), Some(Color::RED));
    }

    #[test]
    fn disabled_effect_renders_after_enable() {
        let mixer = mixer_with_two_lights();
        let id = EffectId::from("a");
        mixer
            .lock()
            .add_effect(Effect::area("a", 0, vec![Area::ALL], Color::RED).disabled());
        assert_eq!(mixer.tick(STEP).color_of("1"), Some(Color::BLACK));
        assert_eq!(mixer.observed_phase(&id), Some(Phase::Created));

        assert!(mixer.lock().enable(&id));
        assert_eq!(mixer.tick(STEP).color_of("1"), Some(Color::RED));
        assert_eq!(mixer.observed_phase(&id), Some(Phase::Enabled));
    }

    #[test]
    fn finish_fades_then_prunes_on_next_lock() {
        let mixer = mixer_with_two_lights();
        let id = EffectId::from("a");
        mixer.lock().add_effect(
            Effect::area("a", 0, vec![Area::ALL], Color::WHITE)
                .with_fade_out(Duration::from_millis(100)),
        );
        mixer.tick(STEP);
        assert!(mixer.lock().finish(&id));

        let fading = mixer.tick(Duration::from_millis(50));
        assert_eq!(mixer.phase(&id), Some(Phase::Finishing));
        let r = fading.color_of("1").map(|c| c.r).unwrap_or_default();
        assert!(r > 0.4 && r < 0.6, "half faded, got {r}");

        mixer.tick(Duration::from_millis(60));
        assert_eq!(mixer.phase(&id), Some(Phase::Finished));
        assert_eq!(mixer.effect_count(), 1);

        drop(mixer.lock());
        assert_eq!(mixer.effect_count(), 0);
    }

    #[test]
    fn explosion_finishes_itself() {
        let mixer = mixer_with_two_lights();
        mixer.lock().add_effect(Effect::explosion(
            "boom",
            0,
            Location::new(0.0, 0.0, 0.0),
            Color::WHITE,
            2.0,
            Duration::from_millis(100),
        ));
        mixer.tick(Duration::from_millis(150));
        assert_eq!(mixer.phase(&EffectId::from("boom")), Some(Phase::Finished));
    }

    #[test]
    fn light_source_position_matters() {
        let mixer = mixer_with_two_lights();
        mixer.lock().add_effect(Effect::light_source(
            "spot",
            0,
            Location::new(-0.8, 0.5, 0.0),
            0.5,
            Color::GREEN,
        ));
        let frame = mixer.tick(STEP);
        assert_eq!(frame.color_of("1"), Some(Color::GREEN));
        assert_eq!(frame.color_of("2"), Some(Color::BLACK));
    }

    #[test]
    fn remove_and_unknown_ids() {
        let mixer = mixer_with_two_lights();
        let mut guard = mixer.lock();
        guard.add_effect(Effect::area("a", 0, vec![Area::ALL], Color::RED));
        assert!(guard.remove_effect(&EffectId::from("a")));
        assert!(!guard.remove_effect(&EffectId::from("a")));
        assert!(!guard.finish(&EffectId::from("nope")));
    }
}
