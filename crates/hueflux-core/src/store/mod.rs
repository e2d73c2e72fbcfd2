// ── Credential store ──
//
// Encrypted on-disk list of known bridges plus the id of the active one.
// Whole-file read-modify-write cycles are serialized by `file_lock`;
// pin-check-then-save sequences are serialized per bridge id so saves for
// different bridges never wait on each other's certificate checks.

mod crypto;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::CoreError;
use crate::model::{BridgeRecord, Group};

use self::crypto::StoreCipher;

const FORMAT_VERSION: u32 = 1;

// ── On-disk representation ───────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    active: Option<String>,
    #[serde(default)]
    bridges: Vec<PersistedBridge>,
}

#[derive(Serialize, Deserialize)]
struct PersistedBridge {
    id: String,
    #[serde(default)]
    name: String,
    address: String,
    tcp_port: u16,
    ssl_port: u16,
    streaming_port: u16,
    #[serde(default)]
    model_id: String,
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    sw_version: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    client_key: Option<String>,
    #[serde(default)]
    certificate: Option<String>,
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    selected_group: Option<String>,
    /// A connection was committed while the bridge presented no
    /// certificate. Only one such commit is allowed per pairing.
    #[serde(default)]
    unpinned_commit: bool,
}

impl std::fmt::Debug for PersistedBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedBridge")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl From<&BridgeRecord> for PersistedBridge {
    fn from(r: &BridgeRecord) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            address: r.address.clone(),
            tcp_port: r.tcp_port,
            ssl_port: r.ssl_port,
            streaming_port: r.streaming_port,
            model_id: r.model_id.clone(),
            api_version: r.api_version.clone(),
            sw_version: r.sw_version.clone(),
            user: r.user.clone(),
            client_key: r.client_key.as_ref().map(|k| k.expose_secret().to_owned()),
            certificate: r.certificate.clone(),
            groups: r.groups.clone(),
            selected_group: r.selected_group.clone(),
            unpinned_commit: false,
        }
    }
}

impl From<PersistedBridge> for BridgeRecord {
    fn from(p: PersistedBridge) -> Self {
        Self {
            id: p.id,
            name: p.name,
            address: p.address,
            tcp_port: p.tcp_port,
            ssl_port: p.ssl_port,
            streaming_port: p.streaming_port,
            model_id: p.model_id,
            api_version: p.api_version,
            sw_version: p.sw_version,
            user: p.user,
            client_key: p.client_key.map(SecretString::from),
            certificate: p.certificate.filter(|c| !c.is_empty()),
            groups: p.groups,
            selected_group: p.selected_group,
        }
    }
}

/// What the store knows about a bridge's certificate.
#[derive(Debug, Default)]
struct PinState {
    certificate: Option<String>,
    unpinned_commit: bool,
}

/// One bridge's stored entry and the active id, as they were before a
/// commit.
pub(crate) struct Checkpoint {
    id: String,
    active: Option<String>,
    entry: Option<PersistedBridge>,
}

// ── Store ────────────────────────────────────────────────────────────

pub struct CredentialStore {
    path: PathBuf,
    cipher: StoreCipher,
    file_lock: Mutex<()>,
    bridge_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, key: &SecretString) -> Self {
        Self {
            path: path.into(),
            cipher: StoreCipher::new(key),
            file_lock: Mutex::new(()),
            bridge_locks: DashMap::new(),
        }
    }

    pub fn from_context(ctx: &Context) -> Self {
        Self::new(ctx.storage_path(), ctx.encryption_key())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The active bridge, or `None` for a missing, empty or undecryptable store.
    pub async fn load(&self) -> Result<Option<BridgeRecord>, CoreError> {
        let _file = self.file_lock.lock().await;
        let mut file = self.read_file().await?;
        let index = file
            .active
            .as_deref()
            .and_then(|active| file.bridges.iter().position(|b| b.id == active))
            .or_else(|| (!file.bridges.is_empty()).then_some(0));
        Ok(index.map(|i| file.bridges.swap_remove(i).into()))
    }

    pub async fn load_bridge(&self, id: &str) -> Result<Option<BridgeRecord>, CoreError> {
        let _file = self.file_lock.lock().await;
        self.find(id).await
    }

    /// Insert or replace `record` and make it the active bridge.
    pub async fn save(&self, record: &BridgeRecord) -> Result<(), CoreError> {
        if record.is_empty() {
            return Err(CoreError::Storage {
                message: "refusing to persist a record without id and address".into(),
            });
        }
        let _bridge = self.bridge_lock(&record.id).await;
        self.upsert(record, None).await
    }

    /// Check `presented` against the pin stored for `bridge_id`.
    ///
    /// A stored non-empty pin must match exactly. With no pin yet, any
    /// certificate is accepted; [`commit_connection`](Self::commit_connection)
    /// then pins it so the free pass is used up. A bridge that presents no
    /// certificate gets the free pass once per pairing.
    pub async fn verify_pin(
        &self,
        bridge_id: &str,
        presented: Option<&str>,
    ) -> Result<(), CoreError> {
        let _bridge = self.bridge_lock(bridge_id).await;
        let pin = {
            let _file = self.file_lock.lock().await;
            self.pin_state(bridge_id).await?
        };
        check_pin(bridge_id, &pin, presented)
    }

    /// Pin-check `presented`, then persist `record` with it as the pin.
    /// Both steps run under the bridge's lock.
    pub async fn commit_connection(
        &self,
        record: &BridgeRecord,
        presented: Option<&str>,
    ) -> Result<BridgeRecord, CoreError> {
        if record.is_empty() {
            return Err(CoreError::Storage {
                message: "refusing to persist a record without id and address".into(),
            });
        }
        let _bridge = self.bridge_lock(&record.id).await;
        let pin = {
            let _file = self.file_lock.lock().await;
            self.pin_state(&record.id).await?
        };
        check_pin(&record.id, &pin, presented)?;

        let presented = presented.filter(|c| !c.is_empty()).map(str::to_owned);
        let unpinned = presented.is_none() && pin.certificate.is_none();
        if unpinned {
            warn!(bridge_id = %record.id, "bridge presented no certificate, nothing pinned");
        }
        let mut committed = record.clone();
        committed.certificate = presented.or(pin.certificate);
        self.upsert(&committed, Some(unpinned)).await?;
        Ok(committed)
    }

    /// Snapshot of one bridge's entry, for [`restore`](Self::restore).
    pub(crate) async fn checkpoint(&self, id: &str) -> Result<Checkpoint, CoreError> {
        let _file = self.file_lock.lock().await;
        let file = self.read_file().await?;
        Ok(Checkpoint {
            id: id.to_owned(),
            active: file.active,
            entry: file.bridges.into_iter().find(|b| b.id == id),
        })
    }

    /// Put one bridge's entry and the active id back as `checkpoint` saw
    /// them. Other bridges are left alone.
    pub(crate) async fn restore(&self, checkpoint: Checkpoint) -> Result<(), CoreError> {
        let _bridge = self.bridge_lock(&checkpoint.id).await;
        let _file = self.file_lock.lock().await;
        let mut file = self.read_file().await?;
        file.bridges.retain(|b| b.id != checkpoint.id);
        file.bridges.extend(checkpoint.entry);
        file.active = checkpoint.active;
        file.version = FORMAT_VERSION;
        self.write_file(&file).await?;
        debug!(bridge_id = %checkpoint.id, "bridge record restored");
        Ok(())
    }

    /// Drop user, client key and pin of one bridge, keeping its identity.
    pub async fn forget_credentials(&self, bridge_id: &str) -> Result<bool, CoreError> {
        let _bridge = self.bridge_lock(bridge_id).await;
        let record = {
            let _file = self.file_lock.lock().await;
            self.find(bridge_id).await?
        };
        let Some(mut record) = record else {
            return Ok(false);
        };
        record.forget_credentials();
        self.upsert(&record, Some(false)).await?;
        Ok(true)
    }

    /// Delete the store file. A missing file is not an error.
    pub async fn clear(&self) -> Result<(), CoreError> {
        let _file = self.file_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "credential store cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("remove", &self.path, &e)),
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn bridge_lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.bridge_locks
                .entry(id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }

    /// Caller holds `file_lock`.
    async fn find(&self, id: &str) -> Result<Option<BridgeRecord>, CoreError> {
        let file = self.read_file().await?;
        Ok(file
            .bridges
            .into_iter()
            .find(|b| b.id == id)
            .map(BridgeRecord::from))
    }

    /// Caller holds `file_lock`.
    async fn pin_state(&self, id: &str) -> Result<PinState, CoreError> {
        let file = self.read_file().await?;
        Ok(file
            .bridges
            .into_iter()
            .find(|b| b.id == id)
            .map(|b| PinState {
                certificate: b.certificate.filter(|c| !c.is_empty()),
                unpinned_commit: b.unpinned_commit,
            })
            .unwrap_or_default())
    }

    /// Insert or replace `record`. `unpinned_commit` of `None` keeps the
    /// stored marker.
    async fn upsert(
        &self,
        record: &BridgeRecord,
        unpinned_commit: Option<bool>,
    ) -> Result<(), CoreError> {
        let _file = self.file_lock.lock().await;
        let mut file = self.read_file().await?;
        let mut persisted = PersistedBridge::from(record);
        match file.bridges.iter_mut().find(|b| b.id == record.id) {
            Some(slot) => {
                persisted.unpinned_commit = unpinned_commit.unwrap_or(slot.unpinned_commit);
                *slot = persisted;
            }
            None => {
                persisted.unpinned_commit = unpinned_commit.unwrap_or_default();
                file.bridges.push(persisted);
            }
        }
        file.active = Some(record.id.clone());
        file.version = FORMAT_VERSION;
        self.write_file(&file).await?;
        debug!(bridge_id = %record.id, "bridge record saved");
        Ok(())
    }

    /// Caller holds `file_lock`.
    async fn read_file(&self) -> Result<StoreFile, CoreError> {
        let sealed = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoreFile::default()),
            Err(e) => return Err(storage_error("read", &self.path, &e)),
        };
        let Ok(plain) = self.cipher.open(&sealed) else {
            warn!(
                path = %self.path.display(),
                "credential store could not be decrypted, treating it as empty"
            );
            return Ok(StoreFile::default());
        };
        match serde_json::from_slice(&plain) {
            Ok(file) => Ok(file),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "credential store is malformed, treating it as empty"
                );
                Ok(StoreFile::default())
            }
        }
    }

    /// Caller holds `file_lock`. Writes a sibling temp file, then renames.
    async fn write_file(&self, file: &StoreFile) -> Result<(), CoreError> {
        let plain = serde_json::to_vec(file).map_err(|e| CoreError::Storage {
            message: format!("serialize: {e}"),
        })?;
        let sealed = self.cipher.seal(&plain)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create directory", parent, &e))?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &sealed)
            .await
            .map_err(|e| storage_error("write", &tmp, &e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| storage_error("chmod", &tmp, &e))?;
        }
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_error("rename", &self.path, &e))
    }
}

fn check_pin(bridge_id: &str, pin: &PinState, presented: Option<&str>) -> Result<(), CoreError> {
    let presented = presented.filter(|c| !c.is_empty());
    match pin.certificate.as_deref() {
        Some(pinned) if presented == Some(pinned) => Ok(()),
        Some(_) => {
            warn!(bridge_id, "presented certificate does not match the pinned one");
            Err(CoreError::CertificateMismatch {
                bridge_id: bridge_id.to_owned(),
            })
        }
        None if presented.is_none() && pin.unpinned_commit => {
            warn!(bridge_id, "bridge again presented no certificate to pin");
            Err(CoreError::CertificateMismatch {
                bridge_id: bridge_id.to_owned(),
            })
        }
        None => Ok(()),
    }
}

fn storage_error(action: &str, path: &Path, err: &std::io::Error) -> CoreError {
    CoreError::Storage {
        message: format!("{action} {}: {err}", path.display()),
    }
}
