// ── Bridge monitor ──
//
// While connected, the bridge is read periodically: identity first, then
// the group list, the latter only if the certificate is still the one this
// session trusted. Differences to the bridge snapshot are published as
// Internal feedback and the snapshot is refreshed unless a procedure
// started in the meantime.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use hueflux_api::{BridgeConfig, normalize_bridge_id};

use super::{ConnectionResult, Controller, ControllerInner};
use crate::bridge::BridgeIdentity;
use crate::error::CoreError;
use crate::feedback::{FeedbackId, RequestType};
use crate::model::{BridgeRecord, Group};

/// Handle to the task started by [`Controller::monitor`]. Dropping it
/// stops the task too, without waiting.
#[derive(Debug)]
pub struct BridgeMonitor {
    cancel: DropGuard,
    task: JoinHandle<()>,
}

impl BridgeMonitor {
    /// Stop checking; a check already running is allowed to finish.
    pub async fn stop(self) {
        let Self { cancel, task } = self;
        cancel.disarm().cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "bridge monitor ended abnormally");
        }
    }
}

impl Controller {
    /// Read the bridge once and publish what changed since the last
    /// snapshot. Returns the published ids: nothing while a procedure runs
    /// or when no bridge is connected.
    pub async fn check_bridge(&self) -> Vec<FeedbackId> {
        self.inner.check_bridge().await
    }

    /// Run [`check_bridge`](Self::check_bridge) in the background, every
    /// `monitor_streaming_interval` while streaming and every
    /// `monitor_idle_interval` otherwise.
    pub fn monitor(&self) -> Result<BridgeMonitor, CoreError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CoreError::Config {
            message: "the bridge monitor requires a Tokio runtime".into(),
        })?;
        let cancel = CancellationToken::new();
        let task = runtime.spawn(monitor_task(Arc::downgrade(&self.inner), cancel.clone()));
        Ok(BridgeMonitor {
            cancel: cancel.drop_guard(),
            task,
        })
    }
}

async fn monitor_task(owner: Weak<ControllerInner>, cancel: CancellationToken) {
    debug!("bridge monitor started");
    loop {
        let Some(period) = owner.upgrade().map(|inner| inner.check_period()) else {
            return;
        };
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }
        let Some(inner) = owner.upgrade() else {
            return;
        };
        inner.check_bridge().await;
    }
    debug!("bridge monitor stopped");
}

impl ControllerInner {
    fn check_period(&self) -> std::time::Duration {
        let timing = self.ctx.timing();
        if *self.state.borrow() == ConnectionResult::Streaming {
            timing.monitor_streaming_interval
        } else {
            timing.monitor_idle_interval
        }
    }

    async fn check_bridge(&self) -> Vec<FeedbackId> {
        let record = self.bridge.load_full();
        let connected = matches!(
            *self.state.borrow(),
            ConnectionResult::ReadyToStart | ConnectionResult::Streaming
        );
        if !connected || self.op_slot().is_some() || !record.has_credentials() {
            return Vec::new();
        }
        let generation = self.stream_slot().as_ref().map(|s| s.generation);
        match self.read_bridge(&record).await {
            Ok((config, groups)) => self.compare(&record, config, groups, generation).await,
            Err(e) => self.lost(&e, generation).await,
        }
    }

    /// Identity and groups as the bridge reports them now. Fails when the
    /// bridge is unreachable, answers as another bridge or presents a
    /// certificate other than the trusted one.
    async fn read_bridge(
        &self,
        record: &BridgeRecord,
    ) -> Result<(BridgeConfig, Vec<Group>), CoreError> {
        let authority = record.https_authority();
        let untrusted = || CoreError::CertificateMismatch {
            bridge_id: record.id.clone(),
        };

        let BridgeIdentity {
            config,
            certificate,
        } = self.api.identify(&authority).await?;
        if normalize_bridge_id(&config.bridge_id) != record.id {
            return Err(CoreError::BridgeNotFound {
                address: record.address.clone(),
            });
        }
        if !trusted(record, certificate.as_deref()) {
            return Err(untrusted());
        }

        let user = record.user.as_deref().unwrap_or_default();
        let details = self.api.details(&authority, user).await?;
        if !trusted(record, details.certificate.as_deref()) {
            return Err(untrusted());
        }
        let groups = details.groups.into_iter().map(Group::from).collect();
        Ok((config, groups))
    }

    async fn lost(&self, error: &CoreError, generation: Option<u64>) -> Vec<FeedbackId> {
        if !self.reachable.swap(false, Ordering::Relaxed) {
            debug!(error = %error, "bridge still unreachable");
            return Vec::new();
        }
        warn!(error = %error, "lost the bridge");
        let mut changes = Vec::new();
        if let Some(generation) = generation {
            if self.stop_generation(generation).await {
                self.leave_streaming();
                changes.push(FeedbackId::StreamingDisconnected);
            }
        }
        changes.push(FeedbackId::BridgeDisconnected);
        self.announce(&changes, &error.to_string());
        changes
    }

    async fn compare(
        &self,
        record: &Arc<BridgeRecord>,
        config: BridgeConfig,
        groups: Vec<Group>,
        generation: Option<u64>,
    ) -> Vec<FeedbackId> {
        let mut changes = Vec::new();
        if !self.reachable.swap(true, Ordering::Relaxed) {
            info!(bridge = %record.id, "bridge reachable again");
            changes.push(FeedbackId::BridgeConnected);
        }

        let mut live = BridgeRecord::clone(record);
        live.name = config.name;
        live.model_id = config.model_id;
        live.api_version = config.api_version;
        live.sw_version = config.sw_version;
        live.groups = groups;

        let user = record.user.as_deref().unwrap_or_default();
        let was_streaming = generation.is_some() || streamed(record, user);
        let streaming = streamed(&live, user);
        if streaming && !was_streaming {
            changes.push(FeedbackId::StreamingConnected);
        }
        if was_streaming && !streaming {
            if let Some(generation) = generation {
                info!(generation, "bridge no longer streams for us, stopping");
                if self.stop_generation(generation).await {
                    self.leave_streaming();
                }
            }
            changes.push(FeedbackId::StreamingDisconnected);
        }

        if bridge_changed(record, &live) {
            changes.push(FeedbackId::BridgeChanged);
        }
        if groups_changed(&record.groups, &live.groups) {
            changes.push(FeedbackId::GroupListUpdated);
        }
        let (before, after) = (record.selected_group(), live.selected_group());
        let relayout = lights_changed(before, after);
        if relayout {
            changes.push(FeedbackId::LightsUpdated);
        }
        if !streaming && light_state_changed(before, after) {
            changes.push(FeedbackId::GroupLightStateUpdated);
        }

        self.refresh(record, live, relayout);
        self.announce(&changes, &format!("bridge {}", record.id));
        changes
    }

    /// Replace the snapshot with `live` unless a procedure holds the slot
    /// or the snapshot moved on since `seen` was loaded.
    fn refresh(&self, seen: &Arc<BridgeRecord>, live: BridgeRecord, relayout: bool) {
        let slot = self.op_slot();
        if slot.is_some() {
            debug!("procedure running, live read dropped");
            return;
        }
        let live = Arc::new(live);
        let previous = self.bridge.compare_and_swap(seen, Arc::clone(&live));
        if !Arc::ptr_eq(&*previous, seen) {
            debug!("bridge snapshot moved on, live read dropped");
            return;
        }
        if relayout {
            if let Some(group) = live.selected_group() {
                self.mixer.set_group(group);
            }
        }
    }

    fn announce(&self, changes: &[FeedbackId], detail: &str) {
        for id in changes {
            self.bus.emit(*id, RequestType::Internal, detail);
        }
    }
}

// ── Comparisons ──────────────────────────────────────────────────────

fn trusted(record: &BridgeRecord, presented: Option<&str>) -> bool {
    presented.filter(|c| !c.is_empty()) == record.certificate.as_deref()
}

fn streamed(record: &BridgeRecord, user: &str) -> bool {
    record.selected_group().is_some_and(|g| g.streamed_by(user))
}

fn bridge_changed(old: &BridgeRecord, new: &BridgeRecord) -> bool {
    old.name != new.name
        || old.model_id != new.model_id
        || old.api_version != new.api_version
        || old.sw_version != new.sw_version
}

fn groups_changed(old: &[Group], new: &[Group]) -> bool {
    old.len() != new.len()
        || old.iter().zip(new).any(|(a, b)| {
            a.id != b.id
                || a.name != b.name
                || a.stream_active != b.stream_active
                || a.stream_owner != b.stream_owner
        })
}

/// Light ids or floor positions (x/y) of the selected group differ.
fn lights_changed<'a>(old: Option<&'a Group>, new: Option<&'a Group>) -> bool {
    let lights = |g: Option<&'a Group>| -> &'a [_] { g.map_or(&[][..], |g| g.lights.as_slice()) };
    let (old, new) = (lights(old), lights(new));
    old.len() != new.len()
        || old.iter().zip(new).any(|(a, b)| {
            a.id != b.id
                || (a.position.x - b.position.x).abs() > f64::EPSILON
                || (a.position.y - b.position.y).abs() > f64::EPSILON
        })
}

/// An unknown live state never counts as a change.
fn light_state_changed(old: Option<&Group>, new: Option<&Group>) -> bool {
    new.and_then(|g| g.light_state)
        .is_some_and(|state| old.and_then(|g| g.light_state) != Some(state))
}
