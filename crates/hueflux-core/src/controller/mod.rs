// ── Connection state machine ──
//
// `Controller` is the entry point for consumers. It owns the credential
// store, discovery, the authorizer, the mixer and the active stream, and
// runs at most one connect procedure at a time. Progress is observable
// through the feedback bus and `watch_state()`.
//
// Every state change made on behalf of a procedure goes through the
// operation slot lock, so `abort()` and a procedure finishing can never
// both publish a terminal event.

mod flow;
mod monitor;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hueflux_api::TransportConfig;

use crate::auth::Authorizer;
use crate::bridge::{BridgeApi, HttpBridgeApi};
use crate::context::Context;
use crate::discovery::{BridgeDiscovery, DiscoveryService, NetworkDiscovery};
use crate::effect::Mixer;
use crate::error::CoreError;
use crate::feedback::{FeedbackBus, FeedbackEvent, FeedbackId, RequestType};
use crate::model::{BridgeRecord, BridgeRequirements, BridgeStatus};
use crate::store::CredentialStore;
use crate::stream::{
    SinkFactory, StreamExit, StreamStats, StreamStatsSnapshot, StreamingLoop, TransportError,
    UdpSinkFactory,
};

use self::flow::Outcome;
pub use self::monitor::BridgeMonitor;

// ── Public state ─────────────────────────────────────────────────────

/// Single authoritative status of the state machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
pub enum ConnectionResult {
    Uninitialized,
    Searching,
    BridgeFound,
    /// The user has to do something (select a group, update the bridge,
    /// reset a pinned certificate) before streaming can start.
    ActionRequired,
    Authorizing,
    ReadyToStart,
    Streaming,
    /// A procedure is running a phase without a more specific state.
    Busy,
}

/// Handle to a procedure running in the background.
#[derive(Debug)]
pub struct Operation {
    task: JoinHandle<ConnectionResult>,
}

impl Operation {
    /// Wait for the procedure to end; returns the state it left behind.
    /// An aborted procedure reports [`ConnectionResult::Uninitialized`].
    pub async fn finished(self) -> ConnectionResult {
        self.task.await.unwrap_or(ConnectionResult::Uninitialized)
    }
}

// ── Internals ────────────────────────────────────────────────────────

/// Identity of one running procedure.
#[derive(Debug, Clone)]
struct Op {
    id: u64,
    cancel: CancellationToken,
}

struct PendingOp {
    id: u64,
    name: &'static str,
    cancel: CancellationToken,
    /// Bridge snapshot restored when the procedure fails or is aborted.
    previous: Arc<BridgeRecord>,
    /// Streams with a higher generation were started by this procedure.
    streams_from: u64,
}

struct ActiveStream {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<StreamStats>,
}

/// Background procedures started by the public `connect*` calls.
#[derive(Debug)]
enum Procedure {
    Connect,
    ManualAddress(String),
    NewBridge,
    BridgeInfo(Box<BridgeRecord>),
}

impl Procedure {
    fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::ManualAddress(_) => "connect to address",
            Self::NewBridge => "connect new bridge",
            Self::BridgeInfo(_) => "connect with bridge info",
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────

/// Cheaply cloneable via `Arc<ControllerInner>`.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    ctx: Arc<Context>,
    store: CredentialStore,
    bus: FeedbackBus,
    discovery: DiscoveryService,
    authorizer: Authorizer,
    api: Arc<dyn BridgeApi>,
    sinks: Arc<dyn SinkFactory>,
    mixer: Arc<Mixer>,
    state: watch::Sender<ConnectionResult>,
    bridge: ArcSwap<BridgeRecord>,
    operation: Mutex<Option<PendingOp>>,
    next_op: AtomicU64,
    stream: Mutex<Option<ActiveStream>>,
    /// Serializes starting and stopping the stream.
    stream_control: tokio::sync::Mutex<()>,
    stream_generation: AtomicU64,
    /// Last verdict of the bridge monitor.
    reachable: AtomicBool,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state())
            .field("busy", &self.is_busy())
            .field("bridge", &self.inner.bridge.load().id)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Build a controller over explicit collaborators. Does NOT connect.
    pub fn new(
        ctx: Arc<Context>,
        api: Arc<dyn BridgeApi>,
        discovery: Arc<dyn BridgeDiscovery>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        let bus = FeedbackBus::new();
        let store = CredentialStore::from_context(&ctx);
        let discovery = DiscoveryService::new(discovery, Arc::clone(&api), bus.clone());
        let authorizer = Authorizer::new(
            Arc::clone(&api),
            bus.clone(),
            ctx.device_type(),
            ctx.timing().push_link_poll_interval,
        );
        let (state, _) = watch::channel(ConnectionResult::Uninitialized);

        Self {
            inner: Arc::new(ControllerInner {
                ctx,
                store,
                bus,
                discovery,
                authorizer,
                api,
                sinks,
                mixer: Arc::new(Mixer::new()),
                state,
                bridge: ArcSwap::from_pointee(BridgeRecord::empty()),
                operation: Mutex::new(None),
                next_op: AtomicU64::new(0),
                stream: Mutex::new(None),
                stream_control: tokio::sync::Mutex::new(()),
                stream_generation: AtomicU64::new(0),
                reachable: AtomicBool::new(true),
            }),
        }
    }

    /// Production wiring: HTTPS bridge API, mDNS + N-UPnP discovery and
    /// the UDP frame sink.
    pub fn with_network(ctx: Arc<Context>) -> Result<Self, CoreError> {
        let transport = TransportConfig::default().with_timeout(ctx.timing().http_timeout);
        let discovery = NetworkDiscovery::new(&transport)?;
        let api = HttpBridgeApi::new(transport);
        Ok(Self::new(
            ctx,
            Arc::new(api),
            Arc::new(discovery),
            Arc::new(UdpSinkFactory),
        ))
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn context(&self) -> &Arc<Context> {
        &self.inner.ctx
    }

    pub fn feedback(&self) -> &FeedbackBus {
        &self.inner.bus
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// The effect mixer feeding the stream.
    pub fn mixer(&self) -> Arc<Mixer> {
        Arc::clone(&self.inner.mixer)
    }

    pub fn state(&self) -> ConnectionResult {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionResult> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the current bridge record (empty before a connect).
    pub fn bridge(&self) -> Arc<BridgeRecord> {
        self.inner.bridge.load_full()
    }

    /// Whether a procedure is in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.op_slot().is_some()
    }

    pub fn stream_stats(&self) -> Option<StreamStatsSnapshot> {
        self.inner.stream_slot().as_ref().map(|s| s.stats.snapshot())
    }

    // ── Connect procedures ───────────────────────────────────────────

    /// Reconnect to the persisted bridge, falling back to discovery when it
    /// cannot be reached; discover and push-link when nothing is stored.
    pub fn connect(&self) -> Result<Operation, CoreError> {
        self.spawn(Procedure::Connect)
    }

    /// Skip discovery and push-link against `address`.
    pub fn connect_with_manual_address(
        &self,
        address: impl Into<String>,
    ) -> Result<Operation, CoreError> {
        self.spawn(Procedure::ManualAddress(address.into()))
    }

    /// Discover and push-link even if a bridge is stored. The stored bridge
    /// stays in place until the new one is connected.
    pub fn connect_new_bridge(&self) -> Result<Operation, CoreError> {
        self.spawn(Procedure::NewBridge)
    }

    /// Connect with caller-supplied identity and credentials, skipping
    /// discovery and push-link. The presented certificate gets pinned.
    pub fn connect_manual_bridge_info(&self, record: BridgeRecord) -> Result<Operation, CoreError> {
        if record.is_empty() {
            return Err(CoreError::Config {
                message: "bridge info needs an id and an address".into(),
            });
        }
        self.spawn(Procedure::BridgeInfo(Box::new(record)))
    }

    /// Cancel the running procedure. Returns `false` if nothing was running.
    ///
    /// The state becomes Uninitialized, the bridge snapshot taken before the
    /// procedure is restored and DoneAborted is published exactly once. A
    /// stream the procedure already started is cancelled with it.
    pub fn abort(&self) -> bool {
        let mut slot = self.inner.op_slot();
        let Some(pending) = slot.take() else {
            return false;
        };
        pending.cancel.cancel();
        if let Some(stream) = self
            .inner
            .stream_slot()
            .take_if(|s| s.generation > pending.streams_from)
        {
            debug!(generation = stream.generation, "cancelling stream of aborted procedure");
            stream.cancel.cancel();
        }
        self.inner.bridge.store(pending.previous);
        self.inner
            .state
            .send_replace(ConnectionResult::Uninitialized);
        info!(procedure = pending.name, "procedure aborted");
        self.inner
            .bus
            .emit(FeedbackId::DoneAborted, RequestType::User, pending.name);
        self.inner
            .bus
            .emit(FeedbackId::UserProcedureFinished, RequestType::User, pending.name);
        true
    }

    // ── Bridge commands ──────────────────────────────────────────────

    /// Read the persisted bridge into the state machine without connecting.
    pub async fn load_bridge_info(&self) -> Result<Option<BridgeRecord>, CoreError> {
        if self.is_busy() {
            return Err(CoreError::Busy);
        }
        let record = self.inner.store.load().await?;
        if let Some(record) = &record {
            debug!(bridge = %record.id, "loaded persisted bridge");
            if let Some(group) = record.selected_group() {
                self.inner.mixer.set_group(group);
            }
            self.inner.bridge.store(Arc::new(record.clone()));
        }
        Ok(record)
    }

    /// Select the entertainment group to stream to. A group id unknown to
    /// the bridge is rejected without touching the selection or publishing
    /// anything.
    pub async fn select_group(&self, group_id: &str) -> Result<ConnectionResult, CoreError> {
        let state = self.state();
        let record = self.inner.bridge.load_full();
        let selectable = matches!(
            state,
            ConnectionResult::ReadyToStart
                | ConnectionResult::Streaming
                | ConnectionResult::ActionRequired
        ) && !record.groups.is_empty();
        if !selectable {
            return Err(CoreError::InvalidState {
                operation: "select a group",
                state: state.to_string(),
            });
        }
        if record.group(group_id).is_none() {
            return Err(CoreError::InvalidGroup {
                id: group_id.to_owned(),
            });
        }

        let op = self.inner.begin("select group")?;
        let result = self.inner.apply_group(&op, &record, group_id).await;
        self.inner.conclude(&op, result)
    }

    /// Start streaming to the selected group. Starting while streaming is a
    /// no-op.
    pub async fn start(&self) -> Result<(), CoreError> {
        let state = self.state();
        if state == ConnectionResult::Streaming {
            return Ok(());
        }
        if self.is_busy() {
            return Err(CoreError::Busy);
        }
        if state != ConnectionResult::ReadyToStart {
            return Err(CoreError::InvalidState {
                operation: "start streaming",
                state: state.to_string(),
            });
        }
        let record = self.inner.bridge.load_full();
        ready(&record, self.inner.ctx.requirements())?;

        let op = self.inner.begin("start streaming")?;
        let result = self.inner.start_stream(&op, &record).await;
        let state = match &result {
            Ok(()) => ConnectionResult::Streaming,
            Err(e) => {
                warn!(error = %e, "could not start streaming");
                ConnectionResult::ReadyToStart
            }
        };
        let record = BridgeRecord::clone(&record);
        self.inner.conclude(&op, Ok(Outcome::Updated { record, state }))?;
        result
    }

    /// Stop streaming and wait for the loop and its sink to shut down.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let streaming = self.state() == ConnectionResult::Streaming;
        if !streaming && self.inner.stream_slot().is_none() {
            return Ok(());
        }
        self.inner
            .bus
            .emit(FeedbackId::UserProcedureStarted, RequestType::User, "stop streaming");
        self.inner.stop_stream().await;
        self.inner.leave_streaming();
        self.inner
            .bus
            .emit(FeedbackId::UserProcedureFinished, RequestType::User, "stop streaming");
        Ok(())
    }

    /// Stop streaming, delete every stored bridge and return to
    /// Uninitialized. A running procedure is aborted first.
    pub async fn reset(&self) -> Result<(), CoreError> {
        self.abort();
        let op = self.inner.begin("reset")?;
        let result = self.inner.clear_all().await;
        self.inner.conclude(&op, result).map(|_| ())
    }

    /// Forget the active bridge's credentials and certificate pin but keep
    /// its identity, so the next connect push-links again.
    pub async fn reset_bridge(&self) -> Result<(), CoreError> {
        self.abort();
        let op = self.inner.begin("reset bridge")?;
        let result = self.inner.forget_active().await;
        self.inner.conclude(&op, result).map(|_| ())
    }

    fn spawn(&self, procedure: Procedure) -> Result<Operation, CoreError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CoreError::Config {
            message: "controller procedures require a Tokio runtime".into(),
        })?;
        let state = self.state();
        if state == ConnectionResult::Streaming {
            return Err(CoreError::InvalidState {
                operation: procedure.name(),
                state: state.to_string(),
            });
        }
        let op = self.inner.begin(procedure.name())?;
        let inner = Arc::clone(&self.inner);
        let task = runtime.spawn(async move {
            let result = inner.run(&op, procedure).await;
            inner
                .conclude(&op, result)
                .unwrap_or(ConnectionResult::Uninitialized)
        });
        Ok(Operation { task })
    }
}

/// Error for a record that cannot be streamed in its current shape.
fn ready(record: &BridgeRecord, requirements: &BridgeRequirements) -> Result<(), CoreError> {
    match record.status(requirements) {
        BridgeStatus::Ready => Ok(()),
        BridgeStatus::Empty => Err(CoreError::BridgeNotFound {
            address: record.address.clone(),
        }),
        BridgeStatus::InvalidModel => Err(CoreError::InvalidModel {
            model: record.model_id.clone(),
        }),
        BridgeStatus::InvalidVersion => Err(CoreError::InvalidVersion {
            version: record.api_version.clone(),
        }),
        BridgeStatus::InvalidCredentials => Err(CoreError::InvalidCredentials {
            message: "missing or malformed client key".into(),
        }),
        BridgeStatus::NoGroupAvailable => Err(CoreError::NoGroupAvailable),
        BridgeStatus::InvalidGroupSelected => Err(CoreError::InvalidGroup {
            id: record.selected_group.clone().unwrap_or_default(),
        }),
        BridgeStatus::Busy => Err(CoreError::InvalidState {
            operation: "start streaming",
            state: "group streamed by another application".into(),
        }),
    }
}

// ── Operation slot ───────────────────────────────────────────────────

impl ControllerInner {
    fn op_slot(&self) -> MutexGuard<'_, Option<PendingOp>> {
        self.operation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream_slot(&self) -> MutexGuard<'_, Option<ActiveStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the operation slot, or fail with [`CoreError::Busy`].
    fn begin(&self, name: &'static str) -> Result<Op, CoreError> {
        let mut slot = self.op_slot();
        if let Some(running) = slot.as_ref() {
            debug!(running = running.name, rejected = name, "rejected while busy");
            return Err(CoreError::Busy);
        }
        let op = Op {
            id: self.next_op.fetch_add(1, Ordering::Relaxed) + 1,
            cancel: CancellationToken::new(),
        };
        *slot = Some(PendingOp {
            id: op.id,
            name,
            cancel: op.cancel.clone(),
            previous: self.bridge.load_full(),
            streams_from: self.stream_generation.load(Ordering::Relaxed),
        });
        self.state.send_replace(ConnectionResult::Busy);
        self.bus
            .emit(FeedbackId::UserProcedureStarted, RequestType::User, name);
        Ok(op)
    }

    /// Publish an intermediate state. Fails once the procedure was aborted.
    fn progress(&self, op: &Op, state: ConnectionResult) -> Result<(), CoreError> {
        let slot = self.op_slot();
        match slot.as_ref() {
            Some(pending) if pending.id == op.id && !op.cancel.is_cancelled() => {
                self.state.send_replace(state);
                Ok(())
            }
            _ => Err(CoreError::Cancelled),
        }
    }

    /// Release the slot and publish the procedure's terminal events. Does
    /// nothing but report [`CoreError::Cancelled`] if the procedure was
    /// aborted in the meantime.
    fn conclude(
        &self,
        op: &Op,
        result: Result<Outcome, CoreError>,
    ) -> Result<ConnectionResult, CoreError> {
        let mut slot = self.op_slot();
        let Some(pending) = slot.take_if(|p| p.id == op.id) else {
            debug!(op = op.id, "procedure ended after abort");
            return Err(CoreError::Cancelled);
        };

        let (state, event) = match result {
            Ok(Outcome::Connected { record, streaming }) => {
                info!(bridge = %record.id, streaming, "connected");
                self.reachable.store(true, Ordering::Relaxed);
                self.bridge.store(Arc::new(record));
                let state = if streaming {
                    ConnectionResult::Streaming
                } else {
                    ConnectionResult::ReadyToStart
                };
                let done = FeedbackEvent::new(FeedbackId::DoneCompleted, RequestType::User);
                (state, Some(done))
            }
            Ok(Outcome::ActionRequired {
                record,
                event,
                detail,
            }) => {
                info!(reason = %event, "action required: {detail}");
                self.bridge.store(record.map_or(pending.previous, Arc::new));
                self.bus
                    .publish(FeedbackEvent::new(event, RequestType::User).with_debug(detail));
                let done = FeedbackEvent::new(FeedbackId::DoneActionRequired, RequestType::User);
                (ConnectionResult::ActionRequired, Some(done))
            }
            Ok(Outcome::Updated { record, state }) => {
                self.bridge.store(Arc::new(record));
                (state, None)
            }
            Ok(Outcome::Reset { record }) => {
                self.bridge.store(Arc::new(record));
                let done = FeedbackEvent::new(FeedbackId::DoneReset, RequestType::User);
                (ConnectionResult::Uninitialized, Some(done))
            }
            Err(e) => {
                warn!(procedure = pending.name, error = %e, "procedure failed");
                self.bridge.store(pending.previous);
                self.state.send_replace(ConnectionResult::Uninitialized);
                self.bus.publish(
                    FeedbackEvent::new(FeedbackId::UserProcedureFinished, RequestType::User)
                        .with_message(e.to_string())
                        .with_debug(format!("{} failed: {e:?}", pending.name)),
                );
                return Err(e);
            }
        };

        self.state.send_replace(state);
        if let Some(event) = event {
            self.bus.publish(event.with_debug(pending.name));
        }
        self.bus
            .emit(FeedbackId::UserProcedureFinished, RequestType::User, pending.name);
        Ok(state)
    }

    /// Streaming → ReadyToStart; any other state is left alone.
    fn leave_streaming(&self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionResult::Streaming {
                *state = ConnectionResult::ReadyToStart;
                true
            } else {
                false
            }
        });
    }
}

// ── Streaming ────────────────────────────────────────────────────────

/// What the stream task needs to release the group on the bridge.
struct StreamLease {
    api: Arc<dyn BridgeApi>,
    authority: String,
    user: String,
    group_id: String,
}

impl StreamLease {
    async fn release(&self) {
        if let Err(e) = self
            .api
            .set_streaming(&self.authority, &self.user, &self.group_id, false)
            .await
        {
            debug!(group = %self.group_id, error = %e, "could not deactivate streaming");
        }
    }
}

impl ControllerInner {
    /// Activate streaming on the bridge and spawn the loop on behalf of
    /// `op`. No-op if a stream is already running. The stream is only
    /// registered while `op` still holds the operation slot; otherwise the
    /// group is released again and the call fails with Cancelled.
    async fn start_stream(
        self: &Arc<Self>,
        op: &Op,
        record: &BridgeRecord,
    ) -> Result<(), CoreError> {
        let _control = self.stream_control.lock().await;
        if self.stream_slot().is_some() {
            return Ok(());
        }
        let group = record
            .selected_group()
            .ok_or_else(|| CoreError::InvalidGroup {
                id: record.selected_group.clone().unwrap_or_default(),
            })?;
        let user = record
            .user
            .clone()
            .ok_or_else(|| CoreError::InvalidCredentials {
                message: "no bridge user".into(),
            })?;
        let lease = StreamLease {
            api: Arc::clone(&self.api),
            authority: record.https_authority(),
            user,
            group_id: group.id.clone(),
        };

        self.api
            .set_streaming(&lease.authority, &lease.user, &lease.group_id, true)
            .await?;
        let sink = match self.sinks.open(record).await {
            Ok(sink) => sink,
            Err(e) => {
                lease.release().await;
                return Err(CoreError::Transport { message: e.message });
            }
        };

        self.mixer.set_group(group);
        let streaming = StreamingLoop::new(
            Arc::clone(&self.mixer),
            sink,
            self.ctx.stream().tick_period(),
        );
        let stats = streaming.stats();
        let cancel = CancellationToken::new();
        let generation = self.stream_generation.fetch_add(1, Ordering::Relaxed) + 1;

        // Same lock `abort()` takes, so the stream is either registered
        // before the abort (and cancelled by it) or never registered.
        let rejected = {
            let slot = self.op_slot();
            let current = slot.as_ref().is_some_and(|p| p.id == op.id);
            if current && !op.cancel.is_cancelled() {
                let task = tokio::spawn(stream_task(
                    Arc::downgrade(self),
                    generation,
                    streaming,
                    cancel.clone(),
                    lease,
                ));
                *self.stream_slot() = Some(ActiveStream {
                    generation,
                    cancel,
                    task,
                    stats,
                });
                None
            } else {
                Some(lease)
            }
        };
        if let Some(lease) = rejected {
            debug!(generation, "procedure aborted while streaming started");
            lease.release().await;
            return Err(CoreError::Cancelled);
        }
        info!(group = %group.id, generation, "streaming started");
        Ok(())
    }

    /// Cancel the running stream and wait until its sink is closed and the
    /// group released. Returns whether a stream was running.
    async fn stop_stream(&self) -> bool {
        self.stop_stream_if(|_| true).await
    }

    /// [`stop_stream`](Self::stop_stream), limited to one generation.
    async fn stop_generation(&self, generation: u64) -> bool {
        self.stop_stream_if(|s| s.generation == generation).await
    }

    async fn stop_stream_if(&self, matches: impl Fn(&ActiveStream) -> bool) -> bool {
        let _control = self.stream_control.lock().await;
        let Some(active) = self.stream_slot().take_if(|s| matches(s)) else {
            return false;
        };
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            warn!(error = %e, "stream task ended abnormally");
        }
        info!(generation = active.generation, "streaming stopped");
        true
    }

    /// Called by the stream task when its sink failed. Stale generations
    /// (already stopped or replaced) are ignored.
    fn stream_failed(&self, generation: u64, error: &TransportError) {
        let failed = self
            .stream_slot()
            .take_if(|s| s.generation == generation)
            .is_some();
        if !failed {
            return;
        }
        warn!(generation, error = %error, "streaming disconnected");
        self.leave_streaming();
        self.bus.emit(
            FeedbackId::StreamingDisconnected,
            RequestType::Internal,
            error.message.clone(),
        );
    }
}

async fn stream_task(
    owner: Weak<ControllerInner>,
    generation: u64,
    streaming: StreamingLoop,
    cancel: CancellationToken,
    lease: StreamLease,
) {
    let exit = streaming.run(cancel).await;
    lease.release().await;
    if let StreamExit::Failed(error) = exit {
        if let Some(inner) = owner.upgrade() {
            inner.stream_failed(generation, &error);
        }
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        let stream = self
            .stream
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = stream.take() {
            active.cancel.cancel();
        }
    }
}
