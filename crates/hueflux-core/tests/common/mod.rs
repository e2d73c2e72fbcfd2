#![allow(clippy::unwrap_used, dead_code)]
// Shared fakes for the controller integration tests: an in-memory bridge
// that also answers discovery, and a frame sink factory that records what
// it was asked to send.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use hueflux_api::{
    BridgeConfig, Credentials, DiscoveredBridge, EntertainmentGroup, LightLocation, Registration,
};
use hueflux_core::{
    BridgeApi, BridgeDetails, BridgeDiscovery, BridgeIdentity, BridgeRecord, ConnectionResult,
    Context, ContextConfig, Controller, CoreError, CredentialStore, FeedbackEvent, FeedbackId,
    FlowTiming, Frame, FrameSink, Group, Light, Location, SinkFactory, TransportError,
};

pub const BRIDGE_ID: &str = "001788fffe1ffd08";
pub const ADDRESS: &str = "192.168.1.2";
pub const USER: &str = "8h5fWwLNnoqdXNK2ByHYtDOOM0aUPyhvAvl4VMz5";
pub const CLIENT_KEY: &str = "0123456789ABCDEF0123456789ABCDEF";
pub const CERT: &str = "3f5c2a9e0b7d41c8a6e2f90d1b4c7e35a8d2f6e1c9b0a4d7e3f5c8b1a2d9e6f0";
pub const KEY: &str = "correct horse battery staple";

// ── Fake bridge ─────────────────────────────────────────────────────

struct FakeState {
    bridge_id: String,
    model_id: String,
    api_version: String,
    groups: Vec<EntertainmentGroup>,
    certificate: Option<String>,
    pending_polls: usize,
    discovered: Vec<DiscoveredBridge>,
    hang_discovery: bool,
    unreachable: HashSet<String>,
    streaming: Vec<(String, bool)>,
    register_delay: Option<Duration>,
    streaming_delay: Option<Duration>,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// One bridge on a fake network. Answers `BridgeApi` calls for any
/// reachable address and plays the discovery backend too.
pub struct FakeBridge {
    state: Mutex<FakeState>,
    discover_calls: AtomicUsize,
    identify_calls: AtomicUsize,
    register_calls: AtomicUsize,
    details_calls: AtomicUsize,
    on_details: Mutex<Option<Hook>>,
}

impl FakeBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                bridge_id: "001788FFFE1FFD08".into(),
                model_id: "BSB002".into(),
                api_version: "1.41.0".into(),
                groups: vec![entertainment_group("1", "TV area", false)],
                certificate: Some(CERT.into()),
                pending_polls: 0,
                discovered: Vec::new(),
                hang_discovery: false,
                unreachable: HashSet::new(),
                streaming: Vec::new(),
                register_delay: None,
                streaming_delay: None,
            }),
            discover_calls: AtomicUsize::new(0),
            identify_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            details_calls: AtomicUsize::new(0),
            on_details: Mutex::new(None),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_groups(&self, groups: Vec<EntertainmentGroup>) {
        self.with_state(|s| s.groups = groups);
    }

    pub fn set_certificate(&self, certificate: Option<&str>) {
        self.with_state(|s| s.certificate = certificate.map(str::to_owned));
    }

    /// Number of push-link polls answered "link button not pressed".
    pub fn set_pending_polls(&self, polls: usize) {
        self.with_state(|s| s.pending_polls = polls);
    }

    pub fn announce(&self, address: &str) {
        self.with_state(|s| {
            s.discovered.push(DiscoveredBridge {
                id: Some(s.bridge_id.clone()),
                address: address.to_owned(),
                port: None,
            });
        });
    }

    /// Discovery never returns until cancelled.
    pub fn hang_discovery(&self) {
        self.with_state(|s| s.hang_discovery = true);
    }

    pub fn make_unreachable(&self, address: &str) {
        self.with_state(|s| s.unreachable.insert(address.to_owned()));
    }

    pub fn make_reachable(&self, address: &str) {
        self.with_state(|s| s.unreachable.remove(address));
    }

    /// Every push-link attempt sleeps this long before answering.
    pub fn set_register_delay(&self, delay: Option<Duration>) {
        self.with_state(|s| s.register_delay = delay);
    }

    /// Every streaming toggle sleeps this long before answering.
    pub fn set_streaming_delay(&self, delay: Option<Duration>) {
        self.with_state(|s| s.streaming_delay = delay);
    }

    /// Run `hook` inside every `details` call, before it answers.
    pub fn on_details(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_details.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn set_model(&self, model_id: &str) {
        self.with_state(|s| s.model_id = model_id.to_owned());
    }

    pub fn details_calls(&self) -> usize {
        self.details_calls.load(Ordering::SeqCst)
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// `(group, active)` for every streaming toggle, in call order.
    pub fn streaming_calls(&self) -> Vec<(String, bool)> {
        self.with_state(|s| s.streaming.clone())
    }

    fn reachable(&self, address: &str) -> Result<(), hueflux_api::Error> {
        if self.with_state(|s| s.unreachable.contains(address)) {
            return Err(hueflux_api::Error::Timeout { timeout_secs: 1 });
        }
        Ok(())
    }
}

#[async_trait]
impl BridgeApi for FakeBridge {
    async fn identify(&self, address: &str) -> Result<BridgeIdentity, hueflux_api::Error> {
        self.identify_calls.fetch_add(1, Ordering::SeqCst);
        self.reachable(address)?;
        Ok(self.with_state(|s| BridgeIdentity {
            config: BridgeConfig {
                bridge_id: s.bridge_id.clone(),
                name: "Philips hue".into(),
                model_id: s.model_id.clone(),
                api_version: s.api_version.clone(),
                sw_version: "1941088000".into(),
                mac: Some("00:17:88:1f:fd:08".into()),
            },
            certificate: s.certificate.clone(),
        }))
    }

    async fn register(
        &self,
        address: &str,
        _device_type: &str,
    ) -> Result<Registration, hueflux_api::Error> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.with_state(|s| s.register_delay) {
            tokio::time::sleep(delay).await;
        }
        self.reachable(address)?;
        let pending = self.with_state(|s| {
            if s.pending_polls == 0 {
                return false;
            }
            s.pending_polls -= 1;
            true
        });
        if pending {
            return Ok(Registration::Pending);
        }
        Ok(Registration::Granted(Credentials {
            username: USER.into(),
            client_key: SecretString::from(CLIENT_KEY.to_owned()),
        }))
    }

    async fn details(
        &self,
        address: &str,
        _user: &str,
    ) -> Result<BridgeDetails, hueflux_api::Error> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        self.reachable(address)?;
        if let Some(hook) = self.on_details.lock().unwrap().as_ref() {
            hook();
        }
        Ok(self.with_state(|s| BridgeDetails {
            groups: s.groups.clone(),
            certificate: s.certificate.clone(),
        }))
    }

    async fn set_streaming(
        &self,
        address: &str,
        _user: &str,
        group_id: &str,
        active: bool,
    ) -> Result<(), hueflux_api::Error> {
        if let Some(delay) = self.with_state(|s| s.streaming_delay) {
            tokio::time::sleep(delay).await;
        }
        self.reachable(address)?;
        self.with_state(|s| {
            s.streaming.push((group_id.to_owned(), active));
            if let Some(group) = s.groups.iter_mut().find(|g| g.id == group_id) {
                group.stream_active = active;
                group.stream_owner = active.then(|| USER.to_owned());
            }
        });
        Ok(())
    }
}

#[async_trait]
impl BridgeDiscovery for FakeBridge {
    async fn discover(
        &self,
        _timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Vec<DiscoveredBridge>, CoreError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        if self.with_state(|s| s.hang_discovery) {
            cancel.cancelled().await;
            return Ok(Vec::new());
        }
        Ok(self.with_state(|s| s.discovered.clone()))
    }
}

pub fn entertainment_group(id: &str, name: &str, active: bool) -> EntertainmentGroup {
    EntertainmentGroup {
        id: id.into(),
        name: name.into(),
        class: Some("TV".into()),
        lights: vec![
            LightLocation {
                id: "10".into(),
                x: -0.8,
                y: 0.8,
                z: 0.0,
            },
            LightLocation {
                id: "11".into(),
                x: 0.8,
                y: 0.8,
                z: 0.0,
            },
        ],
        stream_active: active,
        stream_owner: active.then(|| "another-app".to_owned()),
        light_state: None,
    }
}

// ── Recording sinks ─────────────────────────────────────────────────

/// Counts frames across every sink it opened. With `fail_after`, each
/// sink fails fatally once it has sent that many frames.
#[derive(Default)]
pub struct RecordingSinks {
    opened: AtomicUsize,
    frames: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl RecordingSinks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_after(frames: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_after: Some(frames),
            ..Self::default()
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

struct RecordingSink {
    frames: Arc<AtomicUsize>,
    sent: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&mut self, _frame: &Frame) -> Result<(), TransportError> {
        if self.fail_after.is_some_and(|limit| self.sent >= limit) {
            return Err(TransportError::fatal("destination port unreachable"));
        }
        self.sent += 1;
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SinkFactory for RecordingSinks {
    async fn open(&self, _bridge: &BridgeRecord) -> Result<Box<dyn FrameSink>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingSink {
            frames: Arc::clone(&self.frames),
            sent: 0,
            fail_after: self.fail_after,
        }))
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

pub fn store_path(dir: &Path) -> std::path::PathBuf {
    dir.join("bridges.bin")
}

pub fn context(dir: &Path, key: &str, auto_start: bool) -> Arc<Context> {
    let mut config = ContextConfig::new(
        "hueflux-test",
        "ci",
        store_path(dir),
        SecretString::from(key.to_owned()),
    );
    config.auto_start = auto_start;
    config.stream.update_frequency_hz = 50;
    config.timing = FlowTiming {
        discovery_timeout: Duration::from_secs(1),
        push_link_timeout: Duration::from_secs(2),
        push_link_poll_interval: Duration::from_millis(10),
        http_timeout: Duration::from_secs(1),
        monitor_streaming_interval: Duration::from_millis(50),
        monitor_idle_interval: Duration::from_millis(50),
    };
    Context::new(config).unwrap()
}

pub fn controller(
    ctx: Arc<Context>,
    bridge: &Arc<FakeBridge>,
    sinks: &Arc<RecordingSinks>,
) -> Controller {
    Controller::new(ctx, bridge.clone(), bridge.clone(), sinks.clone())
}

pub fn store(dir: &Path, key: &str) -> CredentialStore {
    CredentialStore::new(store_path(dir), &SecretString::from(key.to_owned()))
}

/// A fully authorized record with one group selected, as a previous
/// session would have left it.
pub fn persisted_record() -> BridgeRecord {
    BridgeRecord {
        model_id: "BSB002".into(),
        api_version: "1.41.0".into(),
        user: Some(USER.into()),
        client_key: Some(SecretString::from(CLIENT_KEY.to_owned())),
        certificate: Some(CERT.into()),
        groups: vec![Group::new(
            "1",
            "TV area",
            vec![
                Light::new("10", Location::new(-0.8, 0.8, 0.0)),
                Light::new("11", Location::new(0.8, 0.8, 0.0)),
            ],
        )],
        selected_group: Some("1".into()),
        ..BridgeRecord::identified(BRIDGE_ID, ADDRESS)
    }
}

pub async fn seed(dir: &Path, record: &BridgeRecord) {
    store(dir, KEY).save(record).await.unwrap();
}

pub async fn wait_for_state(controller: &Controller, want: ConnectionResult) {
    let mut rx = controller.watch_state();
    let reached = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
        .await
        .is_ok_and(|changed| changed.is_ok());
    assert!(
        reached,
        "state never became {want}, stuck at {}",
        controller.state()
    );
}

/// Everything published so far, in order.
pub fn drain(rx: &mut UnboundedReceiver<Arc<FeedbackEvent>>) -> Vec<FeedbackId> {
    let mut ids = Vec::new();
    while let Ok(event) = rx.try_recv() {
        ids.push(event.id);
    }
    ids
}

pub fn count(events: &[FeedbackId], id: FeedbackId) -> usize {
    events.iter().filter(|e| **e == id).count()
}
