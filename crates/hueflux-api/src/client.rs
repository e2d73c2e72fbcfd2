// Bridge HTTP client
//
// Wraps `reqwest::Client` with bridge URL construction, the
// `[{"success"}|{"error"}]` envelope, and peer-certificate capture for
// pinning. Callers see typed payloads; bridge error arrays become `Error`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::{
    ApiItem, BridgeConfig, Credentials, EntertainmentGroup, GroupPayload, RegisterRequest,
    RegisterSuccess, Registration,
};
use crate::transport::TransportConfig;

/// Bridge error type for "unauthorized user".
const ERROR_UNAUTHORIZED: u16 = 1;
/// Bridge error type for "link button not pressed".
const ERROR_LINK_BUTTON: u16 = 101;

/// Raw HTTP client for one bridge's local REST API.
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: Url,
    /// SHA-256 fingerprint (hex) of the last peer certificate seen.
    certificate: RwLock<Option<String>>,
}

impl BridgeClient {
    /// Create a client for the bridge at `base_url` (e.g. `https://192.168.1.2`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            certificate: RwLock::new(None),
        }
    }

    /// Build the bridge base URL for an address that may carry a port.
    pub fn base_url_for(address: &str, https: bool) -> Result<Url, Error> {
        let scheme = if https { "https" } else { "http" };
        Ok(Url::parse(&format!("{scheme}://{address}/"))?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fingerprint of the certificate presented on the most recent request.
    ///
    /// `None` until a TLS request has completed, and always `None` over
    /// plain HTTP.
    pub fn certificate_fingerprint(&self) -> Option<String> {
        self.certificate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Unauthenticated bridge identity (`GET /api/config`).
    pub async fn small_config(&self) -> Result<BridgeConfig, Error> {
        let url = self.url("api/config")?;
        self.get_json(url).await
    }

    /// One push-link registration attempt.
    ///
    /// Returns [`Registration::Pending`] while the link button has not been
    /// pressed; callers poll.
    pub async fn register(&self, device_type: &str) -> Result<Registration, Error> {
        let url = self.url("api")?;
        debug!("POST {url}");
        let body = RegisterRequest {
            devicetype: device_type,
            generateclientkey: true,
        };
        let resp = self.http.post(url).json(&body).send().await?;
        self.capture_certificate(&resp);
        let text = read_body(resp).await?;
        let items: Vec<ApiItem<RegisterSuccess>> = parse_json(&text)?;

        match items.into_iter().next() {
            Some(ApiItem::Success { success }) => {
                let client_key = success.clientkey.unwrap_or_default();
                Ok(Registration::Granted(Credentials {
                    username: success.username,
                    client_key: SecretString::from(client_key),
                }))
            }
            Some(ApiItem::Error { error }) if error.code == ERROR_LINK_BUTTON => {
                trace!("link button not pressed");
                Ok(Registration::Pending)
            }
            Some(ApiItem::Error { error }) => Err(Error::BridgeApi {
                code: error.code,
                address: error.address,
                description: error.description,
            }),
            None => Err(Error::Deserialization {
                message: "empty registration response".into(),
                body: text,
            }),
        }
    }

    /// Entertainment groups visible to `username` (`GET /api/<user>/groups`).
    pub async fn groups(&self, username: &str) -> Result<Vec<EntertainmentGroup>, Error> {
        let url = self.url(&format!("api/{username}/groups"))?;
        let raw: HashMap<String, GroupPayload> = self.get_json(url).await?;

        let mut groups: Vec<EntertainmentGroup> = raw
            .into_iter()
            .filter(|(_, g)| g.kind == "Entertainment")
            .map(|(id, g)| EntertainmentGroup::from_payload(id, g))
            .collect();
        groups.sort_by(|a, b| natural_id_cmp(&a.id, &b.id));
        Ok(groups)
    }

    /// Claim or release the streaming slot of an entertainment group.
    pub async fn set_streaming(
        &self,
        username: &str,
        group_id: &str,
        active: bool,
    ) -> Result<(), Error> {
        let url = self.url(&format!("api/{username}/groups/{group_id}"))?;
        debug!("PUT {url} stream.active={active}");
        let body = serde_json::json!({ "stream": { "active": active } });
        let resp = self.http.put(url).json(&body).send().await?;
        self.capture_certificate(&resp);
        let text = read_body(resp).await?;
        let items: Vec<ApiItem<serde_json::Value>> = parse_json(&text)?;
        for item in items {
            if let ApiItem::Error { error } = item {
                return Err(map_api_error(error.code, error.address, error.description));
            }
        }
        Ok(())
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    /// GET a JSON object, translating a bridge error array into `Error`.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        self.capture_certificate(&resp);
        let text = read_body(resp).await?;

        // Errors arrive as a JSON array even on endpoints that return objects.
        if text.trim_start().starts_with('[') {
            if let Ok(items) = serde_json::from_str::<Vec<ApiItem<serde_json::Value>>>(&text) {
                if let Some(ApiItem::Error { error }) = items.into_iter().next() {
                    return Err(map_api_error(error.code, error.address, error.description));
                }
            }
        }
        parse_json(&text)
    }

    fn capture_certificate(&self, resp: &reqwest::Response) {
        let fingerprint = resp
            .extensions()
            .get::<reqwest::tls::TlsInfo>()
            .and_then(reqwest::tls::TlsInfo::peer_certificate)
            .map(|der| hex::encode(Sha256::digest(der)));
        if let Some(fp) = fingerprint {
            trace!("captured peer certificate fingerprint");
            *self
                .certificate
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(fp);
        }
    }
}

fn map_api_error(code: u16, address: String, description: String) -> Error {
    if code == ERROR_UNAUTHORIZED {
        Error::Unauthorized {
            message: description,
        }
    } else if code == ERROR_LINK_BUTTON {
        Error::LinkButtonNotPressed
    } else {
        Error::BridgeApi {
            code,
            address,
            description,
        }
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String, Error> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Unauthorized {
            message: format!("HTTP {status}"),
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Http {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        });
    }
    Ok(resp.text().await?)
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body: body.to_owned(),
        }
    })
}

/// Order numeric ids numerically ("2" < "10"), others lexically.
fn natural_id_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
