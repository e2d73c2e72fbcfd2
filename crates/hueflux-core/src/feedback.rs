// ── Feedback event bus ──
//
// Fan-out of state/progress/error notifications to any number of
// observers. Publishing only enqueues: every subscriber owns an unbounded
// queue drained by its own dispatcher, so a slow observer never stalls the
// publisher or other observers. The registry lock is held while enqueueing,
// which fixes a single global delivery order across concurrent publishers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::CoreError;

// ── Event types ──────────────────────────────────────────────────────

/// Wire-visible feedback message kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
pub enum FeedbackId {
    StartSearching,
    FinishSearchBridgesFound,
    BridgeNotFound,
    NoBridgeFound,
    StartAuthorizing,
    PressPushLink,
    FinishAuthorizingAuthorized,
    FinishAuthorizingFailed,
    FinishRetrievingFailed,
    InvalidVersion,
    InvalidModel,
    InvalidCredentials,
    NoGroupAvailable,
    SelectGroup,
    BridgeBusy,
    UserProcedureStarted,
    UserProcedureFinished,
    DoneCompleted,
    DoneAborted,
    DoneActionRequired,
    DoneReset,
    BridgeConnected,
    BridgeDisconnected,
    StreamingConnected,
    StreamingDisconnected,
    BridgeChanged,
    GroupListUpdated,
    LightsUpdated,
    GroupLightStateUpdated,
}

impl FeedbackId {
    /// Default user-facing text for this kind.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::StartSearching => "Searching for bridges",
            Self::FinishSearchBridgesFound => "Bridges found",
            Self::BridgeNotFound => "The bridge could not be reached",
            Self::NoBridgeFound => "No bridge found on this network",
            Self::StartAuthorizing => "Connecting to the bridge",
            Self::PressPushLink => "Press the link button on the bridge",
            Self::FinishAuthorizingAuthorized => "Bridge authorized",
            Self::FinishAuthorizingFailed => "Authorization with the bridge failed",
            Self::FinishRetrievingFailed => "Could not read bridge configuration",
            Self::InvalidVersion => "Bridge software must be updated",
            Self::InvalidModel => "This bridge model is not supported",
            Self::InvalidCredentials => "The bridge no longer accepts this app",
            Self::NoGroupAvailable => "Create an entertainment area in the Hue app",
            Self::SelectGroup => "Select an entertainment area",
            Self::BridgeBusy => "Another application is streaming to this area",
            Self::UserProcedureStarted => "Busy",
            Self::UserProcedureFinished => "Ready",
            Self::DoneCompleted => "Connected",
            Self::DoneAborted => "Cancelled",
            Self::DoneActionRequired => "Action required",
            Self::DoneReset => "Bridge settings cleared",
            Self::BridgeConnected => "Bridge is reachable again",
            Self::BridgeDisconnected => "Lost connection to the bridge",
            Self::StreamingConnected => "Streaming is active on the bridge",
            Self::StreamingDisconnected => "Streaming stopped unexpectedly",
            Self::BridgeChanged => "Bridge configuration changed",
            Self::GroupListUpdated => "Entertainment areas changed",
            Self::LightsUpdated => "Lights of the entertainment area changed",
            Self::GroupLightStateUpdated => "Lights were switched or dimmed",
        }
    }
}

/// Whether an event stems from a user command or internal housekeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum RequestType {
    User,
    Internal,
}

/// One immutable notification.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackEvent {
    pub id: FeedbackId,
    pub request: RequestType,
    /// Short text suitable for display.
    pub user_message: String,
    /// Verbose detail for logs and bug reports.
    pub debug_message: String,
    pub created_at: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(id: FeedbackId, request: RequestType) -> Self {
        Self {
            id,
            request,
            user_message: id.default_message().to_owned(),
            debug_message: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_debug(mut self, debug_message: impl Into<String>) -> Self {
        self.debug_message = debug_message.into();
        self
    }

    pub fn with_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = user_message.into();
        self
    }
}

// ── Observers ────────────────────────────────────────────────────────

/// Receives events on its own dispatcher task.
///
/// `on_event` runs on a Tokio worker thread. Blocking in it delays only
/// this observer's queue, but it also holds that worker, so long-running
/// work belongs on `spawn_blocking` or a channel
/// ([`FeedbackBus::subscribe_channel`]).
pub trait FeedbackObserver: Send + Sync + 'static {
    fn on_event(&self, event: &FeedbackEvent);
}

impl<F> FeedbackObserver for F
where
    F: Fn(&FeedbackEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &FeedbackEvent) {
        self(event);
    }
}

/// Opaque token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

struct Subscriber {
    handle: SubscriptionHandle,
    tx: mpsc::UnboundedSender<Arc<FeedbackEvent>>,
    active: Arc<AtomicBool>,
}

// ── Bus ──────────────────────────────────────────────────────────────

/// Cheaply cloneable handle to the shared subscriber registry.
#[derive(Clone, Default)]
pub struct FeedbackBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl FeedbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback observer. Must be called inside a Tokio runtime:
    /// the observer is driven by a dispatcher task spawned on it, and each
    /// callback runs synchronously on that task.
    pub fn subscribe(
        &self,
        observer: impl FeedbackObserver,
    ) -> Result<SubscriptionHandle, CoreError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CoreError::Config {
            message: "feedback observers require a Tokio runtime".into(),
        })?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<FeedbackEvent>>();
        let active = Arc::new(AtomicBool::new(true));
        let handle = self.register(tx, Arc::clone(&active));

        runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                // Unsubscribed (possibly from inside the previous callback).
                if !active.load(Ordering::Acquire) {
                    break;
                }
                observer.on_event(&event);
            }
            trace!("feedback dispatcher exiting");
        });
        Ok(handle)
    }

    /// Register a channel observer; events arrive on the returned receiver.
    pub fn subscribe_channel(
        &self,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Arc<FeedbackEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.register(tx, Arc::new(AtomicBool::new(true)));
        (handle, rx)
    }

    /// Remove an observer. Returns `false` if the handle was unknown.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subs = self.lock();
        let Some(pos) = subs.iter().position(|s| s.handle == handle) else {
            return false;
        };
        let sub = subs.remove(pos);
        sub.active.store(false, Ordering::Release);
        true
    }

    /// Deliver `event` to every observer subscribed at this moment.
    pub fn publish(&self, event: FeedbackEvent) {
        debug!(id = %event.id, request = %event.request, "feedback: {}", event.debug_message);
        let event = Arc::new(event);
        let mut subs = self.lock();
        // A closed receiver means the observer went away without unsubscribing.
        subs.retain(|s| s.tx.send(Arc::clone(&event)).is_ok());
    }

    /// Shorthand for publishing a default-message event.
    pub fn emit(&self, id: FeedbackId, request: RequestType, debug_message: impl Into<String>) {
        self.publish(FeedbackEvent::new(id, request).with_debug(debug_message));
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn register(
        &self,
        tx: mpsc::UnboundedSender<Arc<FeedbackEvent>>,
        active: Arc<AtomicBool>,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle(Uuid::new_v4());
        self.lock().push(Subscriber { handle, tx, active });
        handle
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FeedbackBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
