//! Best-effort public-IP duplicate-account gate.
//!
//! A heuristic anti-abuse measure sitting entirely outside the ledger
//! invariants: every failure path here fails open and is only logged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use arcana_core::identity::DuplicateAccountGuard;
use arcana_core::store::{DocumentStore, IpAccountKind};

const IP_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_IP_ENDPOINT: &str = "https://api.ipify.org?format=json";

#[derive(Debug, Deserialize)]
struct IpLookupResponse {
    ip: String,
}

/// Fetches and caches the caller's public IP.
pub struct PublicIpClient {
    client: reqwest::Client,
    endpoint: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl PublicIpClient {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_IP_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            cached: Mutex::new(None),
        }
    }

    /// The public IP, or `None` when it cannot be determined.
    pub async fn public_ip(&self) -> Option<String> {
        {
            let cached = self.cached.lock().await;
            if let Some((ip, at)) = cached.as_ref() {
                if at.elapsed() < IP_CACHE_TTL {
                    return Some(ip.clone());
                }
            }
        }

        let response = match self.client.get(&self.endpoint).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("public IP lookup failed: {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(status = response.status().as_u16(), "public IP lookup failed");
            return None;
        }
        match response.json::<IpLookupResponse>().await {
            Ok(body) => {
                let mut cached = self.cached.lock().await;
                *cached = Some((body.ip.clone(), Instant::now()));
                Some(body.ip)
            }
            Err(e) => {
                tracing::warn!("public IP response decode failed: {e}");
                None
            }
        }
    }
}

impl Default for PublicIpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// [`DuplicateAccountGuard`] backed by the IP registry in the document
/// store.
pub struct IpDuplicateGuard {
    ip_client: PublicIpClient,
    store: Arc<dyn DocumentStore>,
}

impl IpDuplicateGuard {
    pub fn new(ip_client: PublicIpClient, store: Arc<dyn DocumentStore>) -> Self {
        Self { ip_client, store }
    }
}

#[async_trait]
impl DuplicateAccountGuard for IpDuplicateGuard {
    async fn is_duplicate(&self, kind: IpAccountKind) -> bool {
        let Some(ip) = self.ip_client.public_ip().await else {
            return false;
        };
        match self.store.is_ip_used(&ip, kind).await {
            Ok(used) => used,
            Err(e) => {
                tracing::warn!("IP duplicate check failed, allowing: {e}");
                false
            }
        }
    }

    async fn register(&self, account_id: &str, kind: IpAccountKind) {
        let Some(ip) = self.ip_client.public_ip().await else {
            return;
        };
        if let Err(e) = self.store.register_ip(&ip, account_id, kind).await {
            tracing::warn!("IP registration failed: {e}");
        }
    }

    async fn unregister(&self, account_id: &str) {
        if let Err(e) = self.store.unregister_ips_for(account_id).await {
            tracing::warn!("IP unregistration failed: {e}");
        }
    }
}
