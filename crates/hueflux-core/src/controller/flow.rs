// ── Connect procedures ──
//
// The bodies of the background procedures. Each returns an `Outcome`
// (or an error) and leaves publishing of terminal events to `conclude`.
// Intermediate states go through `progress`, which fails once the
// procedure has been aborted.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Host;

use hueflux_api::{DiscoveredBridge, normalize_bridge_id};

use super::{ConnectionResult, ControllerInner, Op, Procedure};
use crate::auth::Authorization;
use crate::bridge::BridgeIdentity;
use crate::error::{AuthError, CoreError};
use crate::feedback::{FeedbackEvent, FeedbackId, RequestType};
use crate::model::{BridgeRecord, BridgeStatus, DEFAULT_SSL_PORT, Group};
use crate::store::Checkpoint;

/// How a procedure ended, short of failing.
#[derive(Debug)]
pub(super) enum Outcome {
    /// Connected and validated; `streaming` if auto-start kicked in.
    Connected { record: BridgeRecord, streaming: bool },
    /// Blocked on the user. `record` replaces the bridge snapshot when set.
    ActionRequired {
        record: Option<BridgeRecord>,
        event: FeedbackId,
        detail: String,
    },
    /// Snapshot and state change without a Done event.
    Updated {
        record: BridgeRecord,
        state: ConnectionResult,
    },
    Reset { record: BridgeRecord },
}

fn action(record: BridgeRecord, event: FeedbackId, detail: impl Into<String>) -> Outcome {
    Outcome::ActionRequired {
        record: Some(record),
        event,
        detail: detail.into(),
    }
}

/// The bridge is not the one that was paired. The previous snapshot stays.
fn untrusted(bridge_id: &str, error: &CoreError) -> Outcome {
    warn!(bridge = %bridge_id, "refusing bridge with a different certificate");
    Outcome::ActionRequired {
        record: None,
        event: FeedbackId::FinishAuthorizingFailed,
        detail: error.to_string(),
    }
}

/// Race `fut` against the procedure's cancellation.
async fn cancellable<F: Future>(op: &Op, fut: F) -> Result<F::Output, CoreError> {
    tokio::select! {
        biased;
        () = op.cancel.cancelled() => Err(CoreError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Drop duplicate and unparsable addresses, keeping discovery order.
fn usable_candidates(found: Vec<DiscoveredBridge>) -> Vec<DiscoveredBridge> {
    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|c| {
            if Host::parse(&c.address).is_err() {
                debug!(address = %c.address, "ignoring unparsable candidate address");
                return false;
            }
            seen.insert(c.address.clone())
        })
        .collect()
}

impl ControllerInner {
    pub(super) async fn run(
        self: &Arc<Self>,
        op: &Op,
        procedure: Procedure,
    ) -> Result<Outcome, CoreError> {
        debug!(procedure = procedure.name(), op = op.id, "procedure started");
        match procedure {
            Procedure::Connect => self.connect_known(op).await,
            Procedure::ManualAddress(address) => self.connect_address(op, &address).await,
            Procedure::NewBridge => self.connect_discovered(op, None).await,
            Procedure::BridgeInfo(record) => self.connect_record(op, *record).await,
        }
    }

    // ── Entry points ─────────────────────────────────────────────────

    async fn connect_known(self: &Arc<Self>, op: &Op) -> Result<Outcome, CoreError> {
        let current = self.bridge.load_full();
        let known = if current.is_empty() {
            self.store.load().await?
        } else {
            Some(BridgeRecord::clone(&current))
        };
        let Some(known) = known.filter(|r| !r.is_empty()) else {
            debug!("no known bridge, starting discovery");
            return self.connect_discovered(op, None).await;
        };

        match self.reconnect(op, known.clone()).await {
            Err(e) if e.is_transient() => {
                info!(bridge = %known.id, error = %e, "known bridge unreachable, discovering");
                self.connect_discovered(op, Some(known)).await
            }
            other => other,
        }
    }

    async fn connect_discovered(
        self: &Arc<Self>,
        op: &Op,
        known: Option<BridgeRecord>,
    ) -> Result<Outcome, CoreError> {
        self.progress(op, ConnectionResult::Searching)?;
        let found = self
            .discovery
            .discover(self.ctx.timing().discovery_timeout, &op.cancel, RequestType::User)
            .await?;
        let found_any = !found.is_empty();
        let candidates = usable_candidates(found);
        if candidates.is_empty() {
            if found_any {
                self.bus.emit(
                    FeedbackId::NoBridgeFound,
                    RequestType::User,
                    "no candidate had a usable address",
                );
            }
            return Err(CoreError::BridgeNotFound {
                address: String::new(),
            });
        }
        self.progress(op, ConnectionResult::BridgeFound)?;

        if let Some(mut known) = known.filter(BridgeRecord::has_credentials) {
            let moved = candidates.iter().find(|c| {
                c.id.as_deref().map(normalize_bridge_id).as_deref() == Some(known.id.as_str())
            });
            if let Some(candidate) = moved {
                info!(bridge = %known.id, address = %candidate.address, "known bridge moved");
                known.address.clone_from(&candidate.address);
                return self.reconnect(op, known).await;
            }
        }

        let authorization = self.push_link(op, &candidates).await?;
        let record = self.authorized_record(authorization).await?;
        self.reconnect(op, record).await
    }

    async fn connect_address(
        self: &Arc<Self>,
        op: &Op,
        address: &str,
    ) -> Result<Outcome, CoreError> {
        let candidate = self
            .discovery
            .resolve(address, &op.cancel, RequestType::User)
            .await?;
        self.progress(op, ConnectionResult::BridgeFound)?;
        let authorization = self.push_link(op, &[candidate]).await?;
        let record = self.authorized_record(authorization).await?;
        self.reconnect(op, record).await
    }

    async fn connect_record(
        self: &Arc<Self>,
        op: &Op,
        record: BridgeRecord,
    ) -> Result<Outcome, CoreError> {
        let address = record.address.clone();
        match self.reconnect(op, record).await {
            Err(e) if e.is_transient() => {
                self.bus
                    .emit(FeedbackId::BridgeNotFound, RequestType::User, format!("{address}: {e}"));
                Err(e)
            }
            other => other,
        }
    }

    // ── Steps ────────────────────────────────────────────────────────

    async fn push_link(
        &self,
        op: &Op,
        candidates: &[DiscoveredBridge],
    ) -> Result<Authorization, CoreError> {
        self.progress(op, ConnectionResult::Authorizing)?;
        let timeout = self.ctx.timing().push_link_timeout;
        match self
            .authorizer
            .authorize(candidates, timeout, &op.cancel, RequestType::User)
            .await
        {
            Ok(authorization) => Ok(authorization),
            Err(AuthError::Cancelled) => Err(CoreError::Cancelled),
            Err(e) => Err(CoreError::Authorization(e)),
        }
    }

    /// Record for a freshly authorized bridge. A previously stored record
    /// with the same id lends its group selection.
    async fn authorized_record(&self, auth: Authorization) -> Result<BridgeRecord, CoreError> {
        let id = auth
            .bridge
            .id
            .as_deref()
            .map(normalize_bridge_id)
            .unwrap_or_default();
        let mut record = BridgeRecord {
            ssl_port: auth.bridge.port.unwrap_or(DEFAULT_SSL_PORT),
            user: Some(auth.credentials.username),
            client_key: Some(auth.credentials.client_key),
            ..BridgeRecord::identified(id, auth.bridge.address)
        };
        if !record.id.is_empty() {
            if let Some(stored) = self.store.load_bridge(&record.id).await? {
                record.selected_group = stored.selected_group;
            }
        }
        Ok(record)
    }

    /// Identify, check the certificate pin, validate, authorize if needed,
    /// retrieve groups, commit and evaluate the result. Nothing carrying
    /// credentials is sent before the pin check passed.
    async fn reconnect(
        self: &Arc<Self>,
        op: &Op,
        mut record: BridgeRecord,
    ) -> Result<Outcome, CoreError> {
        self.progress(op, ConnectionResult::Busy)?;
        let BridgeIdentity {
            config,
            certificate,
        } = cancellable(op, self.api.identify(&record.https_authority())).await??;
        let reported = normalize_bridge_id(&config.bridge_id);
        if !record.id.is_empty() && normalize_bridge_id(&record.id) != reported {
            warn!(expected = %record.id, %reported, "address answered as another bridge");
            return Err(CoreError::BridgeNotFound {
                address: record.address,
            });
        }
        match self.store.verify_pin(&reported, certificate.as_deref()).await {
            Ok(()) => {}
            Err(e @ CoreError::CertificateMismatch { .. }) => {
                return Ok(untrusted(&reported, &e));
            }
            Err(e) => return Err(e),
        }
        record.id = reported;
        record.name = config.name;
        record.model_id = config.model_id;
        record.api_version = config.api_version;
        record.sw_version = config.sw_version;
        record.streaming_port = self.ctx.stream().port;

        let requirements = self.ctx.requirements();
        if !record.is_valid_model(requirements) {
            let detail = format!("model {} cannot stream", record.model_id);
            return Ok(action(record, FeedbackId::InvalidModel, detail));
        }
        if !record.is_valid_api_version(requirements) {
            let detail = format!("API version {} is too old", record.api_version);
            return Ok(action(record, FeedbackId::InvalidVersion, detail));
        }

        if record.user.is_none() && record.client_key.is_none() {
            let candidate = DiscoveredBridge {
                id: Some(record.id.clone()),
                address: record.address.clone(),
                port: Some(record.ssl_port),
            };
            let authorization = self.push_link(op, &[candidate]).await?;
            record.user = Some(authorization.credentials.username);
            record.client_key = Some(authorization.credentials.client_key);
            self.progress(op, ConnectionResult::Busy)?;
        }
        if !record.has_credentials() {
            return Ok(action(
                record,
                FeedbackId::InvalidCredentials,
                "stored client key is malformed",
            ));
        }

        self.retrieve(op, record, certificate).await
    }

    /// `presented` is the certificate seen while identifying; it already
    /// passed the pin check.
    async fn retrieve(
        self: &Arc<Self>,
        op: &Op,
        mut record: BridgeRecord,
        presented: Option<String>,
    ) -> Result<Outcome, CoreError> {
        let user = record.user.clone().unwrap_or_default();
        let details = match cancellable(op, self.api.details(&record.https_authority(), &user))
            .await?
        {
            Ok(details) => details,
            Err(e) if e.is_unauthorized() => {
                return Ok(action(record, FeedbackId::InvalidCredentials, e.to_string()));
            }
            Err(e) if e.is_transient() => return Err(e.into()),
            Err(e) => {
                self.bus
                    .emit(FeedbackId::FinishRetrievingFailed, RequestType::User, e.to_string());
                return Err(e.into());
            }
        };

        record.groups = details.groups.into_iter().map(Group::from).collect();
        if record.selected_group().is_none() {
            record.selected_group = None;
            record.select_group_if_only_one();
        }
        if details.certificate.is_some() && details.certificate != presented {
            let e = CoreError::CertificateMismatch {
                bridge_id: record.id.clone(),
            };
            return Ok(untrusted(&record.id, &e));
        }

        // Nothing is written for a procedure that is already aborted, and a
        // commit that lands after an abort is rolled back.
        self.progress(op, ConnectionResult::Busy)?;
        let checkpoint = self.store.checkpoint(&record.id).await?;
        let record = match self
            .store
            .commit_connection(&record, presented.as_deref())
            .await
        {
            Ok(committed) => committed,
            Err(e @ CoreError::CertificateMismatch { .. }) => {
                return Ok(untrusted(&record.id, &e));
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = self.progress(op, ConnectionResult::Busy) {
            self.undo_commit(checkpoint).await;
            return Err(e);
        }
        self.settle(op, record).await
    }

    async fn undo_commit(&self, checkpoint: Checkpoint) {
        debug!("procedure aborted during commit, restoring the store");
        if let Err(e) = self.store.restore(checkpoint).await {
            warn!(error = %e, "could not roll back an aborted commit");
        }
    }

    /// Evaluate a committed record; auto-start streaming when it is ready.
    async fn settle(
        self: &Arc<Self>,
        op: &Op,
        record: BridgeRecord,
    ) -> Result<Outcome, CoreError> {
        if let Some(group) = record.selected_group() {
            self.mixer.set_group(group);
        }
        let status = record.status(self.ctx.requirements());
        if let Some(blocked) = blocked(record.clone(), status) {
            return Ok(blocked);
        }

        let mut streaming = false;
        if self.ctx.auto_start() {
            match self.start_stream(op, &record).await {
                Ok(()) => streaming = true,
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => warn!(error = %e, "auto-start failed, staying ready"),
            }
        }
        Ok(Outcome::Connected { record, streaming })
    }

    // ── Inline procedures ────────────────────────────────────────────

    pub(super) async fn apply_group(
        self: &Arc<Self>,
        op: &Op,
        current: &BridgeRecord,
        group_id: &str,
    ) -> Result<Outcome, CoreError> {
        let mut record = current.clone();
        record.selected_group = Some(group_id.to_owned());
        self.store.save(&record).await?;
        self.progress(op, ConnectionResult::Busy)?;
        self.bus.publish(
            FeedbackEvent::new(FeedbackId::SelectGroup, RequestType::User)
                .with_message("Entertainment area selected")
                .with_debug(format!("selected group {group_id}")),
        );

        let was_streaming = self.stop_stream().await;
        if let Some(group) = record.selected_group() {
            self.mixer.set_group(group);
        }
        let status = record.status(self.ctx.requirements());
        if let Some(blocked) = blocked(record.clone(), status) {
            return Ok(blocked);
        }

        let mut state = ConnectionResult::ReadyToStart;
        if was_streaming {
            match self.start_stream(op, &record).await {
                Ok(()) => state = ConnectionResult::Streaming,
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => warn!(error = %e, "could not resume streaming on the new group"),
            }
        }
        Ok(Outcome::Updated { record, state })
    }

    pub(super) async fn clear_all(&self) -> Result<Outcome, CoreError> {
        self.stop_stream().await;
        self.store.clear().await?;
        self.mixer.set_lights(Vec::new());
        info!("all bridge data cleared");
        Ok(Outcome::Reset {
            record: BridgeRecord::empty(),
        })
    }

    pub(super) async fn forget_active(&self) -> Result<Outcome, CoreError> {
        self.stop_stream().await;
        let current = self.bridge.load_full();
        let mut record = if current.is_empty() {
            self.store.load().await?.unwrap_or_default()
        } else {
            BridgeRecord::clone(&current)
        };
        if !record.is_empty() {
            self.store.forget_credentials(&record.id).await?;
            record.forget_credentials();
            info!(bridge = %record.id, "bridge credentials forgotten");
        }
        Ok(Outcome::Reset { record })
    }
}

/// The ActionRequired outcome for a record that is not ready, or `None`.
fn blocked(record: BridgeRecord, status: BridgeStatus) -> Option<Outcome> {
    let (event, detail) = match status {
        BridgeStatus::Ready => return None,
        BridgeStatus::Empty => (FeedbackId::BridgeNotFound, "bridge has no identity".to_owned()),
        BridgeStatus::InvalidModel => (
            FeedbackId::InvalidModel,
            format!("model {} cannot stream", record.model_id),
        ),
        BridgeStatus::InvalidVersion => (
            FeedbackId::InvalidVersion,
            format!("API version {} is too old", record.api_version),
        ),
        BridgeStatus::InvalidCredentials => (
            FeedbackId::InvalidCredentials,
            "missing or malformed client key".to_owned(),
        ),
        BridgeStatus::NoGroupAvailable => (
            FeedbackId::NoGroupAvailable,
            "bridge has no entertainment group".to_owned(),
        ),
        BridgeStatus::InvalidGroupSelected => (
            FeedbackId::SelectGroup,
            format!("{} groups to choose from", record.groups.len()),
        ),
        BridgeStatus::Busy => (
            FeedbackId::BridgeBusy,
            "selected group is streamed by another application".to_owned(),
        ),
    };
    Some(action(record, event, detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(address: &str) -> DiscoveredBridge {
        DiscoveredBridge {
            id: None,
            address: address.to_owned(),
            port: None,
        }
    }

    #[test]
    fn candidates_are_deduplicated_and_filtered() {
        let kept = usable_candidates(vec![
            candidate("192.168.1.2"),
            candidate("bad address"),
            candidate("192.168.1.2"),
            candidate(""),
            candidate("hue-bridge.local"),
        ]);
        let addresses: Vec<_> = kept.iter().map(|c| c.address.as_str()).collect();
        assert_eq!(addresses, ["192.168.1.2", "hue-bridge.local"]);
    }

    #[test]
    fn ready_record_is_not_blocked() {
        assert!(blocked(BridgeRecord::empty(), BridgeStatus::Ready).is_none());
        let outcome = blocked(BridgeRecord::empty(), BridgeStatus::InvalidGroupSelected);
        assert!(matches!(
            outcome,
            Some(Outcome::ActionRequired {
                event: FeedbackId::SelectGroup,
                ..
            })
        ));
    }
}
