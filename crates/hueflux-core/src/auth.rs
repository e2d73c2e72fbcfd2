// ── Push-link authorizer ──
//
// Polls one or more candidate bridges with registration requests until a
// user presses the link button on one of them, the deadline passes, or
// the attempt is cancelled. At most one live attempt per candidate
// address; a cancelled attempt gives up its claim even while one of its
// requests is still outstanding.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hueflux_api::{Credentials, DiscoveredBridge, Registration};

use crate::bridge::BridgeApi;
use crate::error::AuthError;
use crate::feedback::{FeedbackBus, FeedbackId, RequestType};

/// Consecutive all-candidates-unreachable rounds tolerated while polling.
const MAX_TRANSIENT_FAILURES: u32 = 3;

/// A granted push-link: which bridge answered and what it handed out.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub bridge: DiscoveredBridge,
    pub credentials: Credentials,
}

pub struct Authorizer {
    api: Arc<dyn BridgeApi>,
    bus: FeedbackBus,
    device_type: String,
    poll_interval: Duration,
    in_flight: Arc<DashMap<String, Claim>>,
    next_attempt: AtomicU64,
}

/// Which attempt holds an address, and whether it was cancelled.
struct Claim {
    attempt: u64,
    cancel: CancellationToken,
}

/// Releases in-flight reservations on every exit path. Claims taken over
/// by a later attempt are left alone.
struct Reservation {
    map: Arc<DashMap<String, Claim>>,
    attempt: u64,
    addresses: Vec<String>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        for address in &self.addresses {
            self.map
                .remove_if(address, |_, claim| claim.attempt == self.attempt);
        }
    }
}

impl Authorizer {
    pub fn new(
        api: Arc<dyn BridgeApi>,
        bus: FeedbackBus,
        device_type: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            bus,
            device_type: device_type.into(),
            poll_interval,
            in_flight: Arc::new(DashMap::new()),
            next_attempt: AtomicU64::new(0),
        }
    }

    /// Whether an attempt still holds a claim on `address`.
    pub fn is_in_flight(&self, address: &str) -> bool {
        self.in_flight.contains_key(address)
    }

    /// Run push-link against `candidates` until one grants credentials.
    ///
    /// PressPushLink is published once, after the first round comes back
    /// pending. Cancellation returns [`AuthError::Cancelled`] and publishes
    /// nothing further.
    pub async fn authorize(
        &self,
        candidates: &[DiscoveredBridge],
        timeout: Duration,
        cancel: &CancellationToken,
        request: RequestType,
    ) -> Result<Authorization, AuthError> {
        let _reservation = self.reserve(candidates, cancel)?;
        let mut remaining: Vec<DiscoveredBridge> = candidates.to_vec();
        let deadline = Instant::now() + timeout;

        self.bus.emit(
            FeedbackId::StartAuthorizing,
            request,
            format!("push-link against {} candidate(s)", remaining.len()),
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut prompted = false;
        let mut transient_failures = 0u32;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled()),
                () = tokio::time::sleep_until(deadline) => {
                    return Err(self.timed_out(request, timeout));
                }
                _ = ticker.tick() => {}
            }

            // A bridge that stops answering mid-round must not outlive the
            // deadline or a cancel.
            let polls = join_all(
                remaining
                    .iter()
                    .map(|c| self.api.register(&c.address, &self.device_type)),
            );
            let round = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled()),
                () = tokio::time::sleep_until(deadline) => {
                    return Err(self.timed_out(request, timeout));
                }
                round = polls => round,
            };

            let mut unreachable = Vec::new();
            let mut keep = Vec::with_capacity(remaining.len());
            for (candidate, result) in remaining.iter().zip(round) {
                match result {
                    Ok(Registration::Granted(credentials)) => {
                        info!(address = %candidate.address, "push-link granted");
                        self.bus.emit(
                            FeedbackId::FinishAuthorizingAuthorized,
                            request,
                            format!("authorized by {}", candidate.address),
                        );
                        return Ok(Authorization {
                            bridge: candidate.clone(),
                            credentials,
                        });
                    }
                    Ok(Registration::Pending) => keep.push(candidate.clone()),
                    Err(e) if e.is_transient() => {
                        debug!(address = %candidate.address, error = %e, "push-link poll failed");
                        unreachable.push(format!("{}: {e}", candidate.address));
                        keep.push(candidate.clone());
                    }
                    Err(e) => {
                        warn!(address = %candidate.address, error = %e, "bridge refused push-link");
                        if remaining.len() == 1 {
                            self.fail(request, &e.to_string());
                            return Err(AuthError::Denied {
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }

            if keep.is_empty() {
                self.fail(request, "every candidate refused push-link");
                return Err(AuthError::Denied {
                    message: "every candidate refused push-link".into(),
                });
            }

            if unreachable.len() == keep.len() {
                transient_failures += 1;
                if transient_failures >= MAX_TRANSIENT_FAILURES {
                    let reason = unreachable.join("; ");
                    self.fail(request, &reason);
                    return Err(AuthError::NetworkUnreachable {
                        address: keep
                            .iter()
                            .map(|c| c.address.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                        reason,
                    });
                }
            } else {
                transient_failures = 0;
            }
            remaining = keep;

            if !prompted {
                prompted = true;
                self.bus.emit(
                    FeedbackId::PressPushLink,
                    request,
                    format!("waiting up to {}s for the link button", timeout.as_secs()),
                );
            }
        }
    }

    /// Claim every candidate address for one attempt. A claim whose owner
    /// was cancelled is taken over.
    fn reserve(
        &self,
        candidates: &[DiscoveredBridge],
        cancel: &CancellationToken,
    ) -> Result<Reservation, AuthError> {
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed) + 1;
        let mut reservation = Reservation {
            map: Arc::clone(&self.in_flight),
            attempt,
            addresses: Vec::with_capacity(candidates.len()),
        };
        for candidate in candidates {
            let claim = Claim {
                attempt,
                cancel: cancel.clone(),
            };
            let taken = match self.in_flight.entry(candidate.address.clone()) {
                Entry::Occupied(held) if !held.get().cancel.is_cancelled() => false,
                Entry::Occupied(mut held) => {
                    debug!(address = %candidate.address, "taking over a cancelled push-link");
                    held.insert(claim);
                    true
                }
                Entry::Vacant(slot) => {
                    slot.insert(claim);
                    true
                }
            };
            if !taken {
                // Dropping `reservation` releases what was taken so far.
                return Err(AuthError::AlreadyInProgress {
                    address: candidate.address.clone(),
                });
            }
            reservation.addresses.push(candidate.address.clone());
        }
        Ok(reservation)
    }

    fn timed_out(&self, request: RequestType, timeout: Duration) -> AuthError {
        warn!(timeout_secs = timeout.as_secs(), "push-link timed out");
        self.fail(request, "link button was not pressed in time");
        AuthError::Timeout {
            timeout_secs: timeout.as_secs(),
        }
    }

    fn fail(&self, request: RequestType, reason: &str) {
        self.bus
            .emit(FeedbackId::FinishAuthorizingFailed, request, reason.to_owned());
    }
}

fn cancelled() -> AuthError {
    debug!("push-link cancelled");
    AuthError::Cancelled
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use secrecy::SecretString;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::bridge::{BridgeDetails, BridgeIdentity};
    use crate::feedback::FeedbackEvent;

    const CLIENT_KEY: &str = "0123456789ABCDEF0123456789ABCDEF";

    /// Replies to `register` from a per-address script; the last entry repeats.
    #[derive(Default)]
    struct ScriptedApi {
        scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    }

    #[derive(Clone)]
    enum Reply {
        Pending,
        Granted,
        Unreachable,
        Refused,
        /// No answer for this many seconds, then pending.
        Stall(u64),
    }

    impl ScriptedApi {
        fn script(self, address: &str, replies: &[Reply]) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(address.into(), replies.iter().cloned().collect());
            self
        }
    }

    #[async_trait]
    impl BridgeApi for ScriptedApi {
        async fn identify(
            &self,
            _address: &str,
        ) -> Result<BridgeIdentity, hueflux_api::Error> {
            Err(hueflux_api::Error::Discovery("unused".into()))
        }

        async fn register(
            &self,
            address: &str,
            _device_type: &str,
        ) -> Result<Registration, hueflux_api::Error> {
            let reply = {
                let mut scripts = self.scripts.lock().unwrap();
                let queue = scripts.get_mut(address).unwrap();
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap()
                }
            };
            match reply {
                Reply::Pending => Ok(Registration::Pending),
                Reply::Stall(secs) => {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    Ok(Registration::Pending)
                }
                Reply::Granted => Ok(Registration::Granted(Credentials {
                    username: format!("user@{address}"),
                    client_key: SecretString::from(CLIENT_KEY.to_string()),
                })),
                Reply::Unreachable => Err(hueflux_api::Error::Http {
                    status: 503,
                    message: "unavailable".into(),
                }),
                Reply::Refused => Err(hueflux_api::Error::BridgeApi {
                    code: 7,
                    address: "/".into(),
                    description: "invalid value".into(),
                }),
            }
        }

        async fn details(
            &self,
            _address: &str,
            _user: &str,
        ) -> Result<BridgeDetails, hueflux_api::Error> {
            Ok(BridgeDetails::default())
        }

        async fn set_streaming(
            &self,
            _address: &str,
            _user: &str,
            _group_id: &str,
            _active: bool,
        ) -> Result<(), hueflux_api::Error> {
            Ok(())
        }
    }

    fn candidate(address: &str) -> DiscoveredBridge {
        DiscoveredBridge {
            id: None,
            address: address.into(),
            port: None,
        }
    }

    fn authorizer(api: ScriptedApi, bus: &FeedbackBus) -> Authorizer {
        Authorizer::new(
            Arc::new(api),
            bus.clone(),
            "hueflux#test",
            Duration::from_millis(100),
        )
    }

    async fn authorize(
        auth: &Authorizer,
        addresses: &[&str],
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<Authorization, AuthError> {
        let candidates: Vec<_> = addresses.iter().map(|a| candidate(a)).collect();
        auth.authorize(
            &candidates,
            Duration::from_secs(timeout_secs),
            cancel,
            RequestType::User,
        )
        .await
    }

    async fn authorize_uncancelled(
        auth: &Authorizer,
        addresses: &[&str],
        timeout_secs: u64,
    ) -> Result<Authorization, AuthError> {
        authorize(auth, addresses, timeout_secs, &CancellationToken::new()).await
    }

    fn drain(rx: &mut UnboundedReceiver<Arc<FeedbackEvent>>) -> Vec<FeedbackId> {
        let mut ids = Vec::new();
        while let Ok(event) = rx.try_recv() {
            ids.push(event.id);
        }
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn grant_after_button_press() {
        let bus = FeedbackBus::new();
        let (_h, mut rx) = bus.subscribe_channel();
        let api = ScriptedApi::default().script(
            "10.0.0.2",
            &[Reply::Pending, Reply::Pending, Reply::Granted],
        );
        let auth = authorizer(api, &bus);

        let granted = authorize_uncancelled(&auth, &["10.0.0.2"], 30).await.unwrap();

        assert_eq!(granted.credentials.username, "user@10.0.0.2");
        assert_eq!(
            drain(&mut rx),
            vec![
                FeedbackId::StartAuthorizing,
                FeedbackId::PressPushLink,
                FeedbackId::FinishAuthorizingAuthorized
            ]
        );
        assert!(!auth.is_in_flight("10.0.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_emits_failure_and_times_out() {
        let bus = FeedbackBus::new();
        let (_h, mut rx) = bus.subscribe_channel();
        let api = ScriptedApi::default().script("10.0.0.2", &[Reply::Pending]);
        let auth = authorizer(api, &bus);

        let err = authorize_uncancelled(&auth, &["10.0.0.2"], 2).await.unwrap_err();

        assert_eq!(err, AuthError::Timeout { timeout_secs: 2 });
        let ids = drain(&mut rx);
        let prompts = ids.iter().filter(|id| **id == FeedbackId::PressPushLink);
        assert_eq!(prompts.count(), 1);
        assert_eq!(ids.last(), Some(&FeedbackId::FinishAuthorizingFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn first_pressed_candidate_wins() {
        let bus = FeedbackBus::new();
        let api = ScriptedApi::default()
            .script("10.0.0.2", &[Reply::Pending])
            .script("10.0.0.3", &[Reply::Pending, Reply::Granted]);
        let auth = authorizer(api, &bus);

        let addresses = ["10.0.0.2", "10.0.0.3"];
        let granted = authorize_uncancelled(&auth, &addresses, 30).await.unwrap();
        assert_eq!(granted.bridge.address, "10.0.0.3");
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_unreachable_rounds_fail() {
        let bus = FeedbackBus::new();
        let api = ScriptedApi::default().script("10.0.0.2", &[Reply::Unreachable]);
        let auth = authorizer(api, &bus);

        let err = authorize_uncancelled(&auth, &["10.0.0.2"], 30).await.unwrap_err();
        assert!(matches!(err, AuthError::NetworkUnreachable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn refusal_is_a_denial() {
        let bus = FeedbackBus::new();
        let api = ScriptedApi::default().script("10.0.0.2", &[Reply::Refused]);
        let auth = authorizer(api, &bus);

        let err = authorize_uncancelled(&auth, &["10.0.0.2"], 30).await.unwrap_err();
        assert!(matches!(err, AuthError::Denied { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling_without_terminal_event() {
        let bus = FeedbackBus::new();
        let (_h, mut rx) = bus.subscribe_channel();
        let api = ScriptedApi::default().script("10.0.0.2", &[Reply::Pending]);
        let auth = Arc::new(authorizer(api, &bus));
        let cancel = CancellationToken::new();

        let task = {
            let auth = Arc::clone(&auth);
            let cancel = cancel.clone();
            tokio::spawn(async move { authorize(&auth, &["10.0.0.2"], 30, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(350)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap().unwrap_err(), AuthError::Cancelled);
        let ids = drain(&mut rx);
        assert!(!ids.contains(&FeedbackId::FinishAuthorizingFailed));
        assert!(!auth.is_in_flight("10.0.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_attempt_on_same_address_is_rejected() {
        let bus = FeedbackBus::new();
        let api = ScriptedApi::default().script("10.0.0.2", &[Reply::Pending]);
        let auth = Arc::new(authorizer(api, &bus));
        let cancel = CancellationToken::new();

        let first = {
            let auth = Arc::clone(&auth);
            let cancel = cancel.clone();
            tokio::spawn(async move { authorize(&auth, &["10.0.0.2"], 30, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = authorize_uncancelled(&auth, &["10.0.0.2"], 30).await.unwrap_err();
        assert!(matches!(second, AuthError::AlreadyInProgress { .. }));

        cancel.cancel();
        let _ = first.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_releases_address_while_a_poll_is_outstanding() {
        let bus = FeedbackBus::new();
        let api = ScriptedApi::default().script("10.0.0.2", &[Reply::Stall(60)]);
        let auth = Arc::new(authorizer(api, &bus));
        let cancel = CancellationToken::new();

        let task = {
            let auth = Arc::clone(&auth);
            let cancel = cancel.clone();
            tokio::spawn(async move { authorize(&auth, &["10.0.0.2"], 30, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(auth.is_in_flight("10.0.0.2"));

        let cancelled_at = Instant::now();
        cancel.cancel();
        assert_eq!(task.await.unwrap().unwrap_err(), AuthError::Cancelled);
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert!(!auth.is_in_flight("10.0.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_while_a_poll_is_outstanding() {
        let bus = FeedbackBus::new();
        let (_h, mut rx) = bus.subscribe_channel();
        let api = ScriptedApi::default().script("10.0.0.2", &[Reply::Stall(60)]);
        let auth = authorizer(api, &bus);

        let started = Instant::now();
        let err = authorize_uncancelled(&auth, &["10.0.0.2"], 2).await.unwrap_err();

        assert_eq!(err, AuthError::Timeout { timeout_secs: 2 });
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(drain(&mut rx).last(), Some(&FeedbackId::FinishAuthorizingFailed));
        assert!(!auth.is_in_flight("10.0.0.2"));
    }

    #[test]
    fn cancelled_claim_is_taken_over_and_kept() {
        let bus = FeedbackBus::new();
        let auth = authorizer(ScriptedApi::default(), &bus);
        let candidates = [candidate("10.0.0.2")];

        let first_cancel = CancellationToken::new();
        let first = auth.reserve(&candidates, &first_cancel).unwrap();
        assert!(matches!(
            auth.reserve(&candidates, &CancellationToken::new()),
            Err(AuthError::AlreadyInProgress { .. })
        ));

        first_cancel.cancel();
        let second = auth.reserve(&candidates, &CancellationToken::new()).unwrap();
        drop(first);
        assert!(auth.is_in_flight("10.0.0.2"));
        drop(second);
        assert!(!auth.is_in_flight("10.0.0.2"));
    }
}
