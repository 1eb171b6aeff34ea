//! Token authentication and capability authorization.
//!
//! The store maps tokens to their shared secret and permission set. Auth
//! checks take shared read access; the secret-store refresh loop in
//! [`vault`] is the only writer at runtime, and it only ever touches
//! entries it created itself.

use crate::bus::Envelope;
use crate::config::AuthEntry;
use crate::error::Error;
use crate::model::{Command, Domain, View};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;

pub mod vault;

/// Half the accepted clock-skew window, in seconds.
const MAX_TIME_SHIFT: i64 = 900;
/// Quantization of the timestamp going into the signature.
const TIME_BUCKET: i64 = 30;

/// Where an auth entry came from. Config entries are immutable for the
/// process lifetime; vault entries are swapped wholesale on refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Config,
    Vault,
}

#[derive(Debug, Clone)]
pub struct AuthData {
    pub token: String,
    pub secret: String,
    pub permissions: Vec<Permission>,
    pub priority: i32,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub domain: Domain,
    pub permitted: Vec<Command>,
}

/// Parse one permission spec: the key is `[view,]name`, the value a
/// comma-separated command list. A bad view drops the whole spec;
/// unknown command words are dropped silently.
#[must_use]
pub fn parse_permission(key: &str, spec: &str) -> Option<Permission> {
    let parts: Vec<&str> = key.split(',').collect();
    let domain = match parts.as_slice() {
        [name] => Domain {
            name: (*name).to_string(),
            view: View::Any,
        },
        [view, name] => Domain {
            name: (*name).to_string(),
            view: View::from_str(view).ok()?,
        },
        _ => return None,
    };
    let permitted = spec
        .split(',')
        .filter_map(|word| Command::from_str(word.trim()).ok())
        .collect();
    Some(Permission { domain, permitted })
}

pub type SharedAuthStore = Arc<AuthStore>;

pub struct AuthStore {
    entries: RwLock<HashMap<String, AuthData>>,
}

impl AuthStore {
    /// Build the store from the static configuration.
    #[must_use]
    pub fn from_config(configured: &HashMap<String, AuthEntry>) -> SharedAuthStore {
        let mut entries = HashMap::with_capacity(configured.len());
        for (token, entry) in configured {
            let permissions = entry
                .permissions
                .iter()
                .filter_map(|(key, spec)| parse_permission(key, spec))
                .collect();
            entries.insert(
                token.clone(),
                AuthData {
                    token: token.clone(),
                    secret: entry.secret.clone(),
                    permissions,
                    priority: entry.priority,
                    source: Source::Config,
                },
            );
        }
        Arc::new(AuthStore {
            entries: RwLock::new(entries),
        })
    }

    pub async fn contains(&self, token: &str) -> bool {
        self.entries.read().await.contains_key(token)
    }

    /// Verify the request signature against the caller's shared secret,
    /// accepting any time bucket within the skew window.
    pub async fn authenticate(&self, envelope: &Envelope) -> Result<(), Error> {
        let (Some(auth), Some(_)) = (&envelope.auth, &envelope.domain) else {
            return Err(Error::Security("invalid (null) request".to_string()));
        };
        if auth.token.is_empty() || auth.sum.is_empty() {
            return Err(invalid_token(&auth.token));
        }
        let secret = {
            let entries = self.entries.read().await;
            match entries.get(&auth.token) {
                Some(data) if !data.secret.is_empty() => data.secret.clone(),
                Some(_) => {
                    tracing::debug!(token = %auth.token, "token has empty secret");
                    return Err(invalid_token(&auth.token));
                }
                None => {
                    tracing::debug!(token = %auth.token, "token not found");
                    return Err(invalid_token(&auth.token));
                }
            }
        };
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let base = now - now % TIME_BUCKET;
        let mut shift = -MAX_TIME_SHIFT;
        while shift <= MAX_TIME_SHIFT {
            let candidate = signature(&secret, &canonical_hash(envelope, base + shift));
            if candidate == auth.sum {
                return Ok(());
            }
            shift += TIME_BUCKET;
        }
        tracing::debug!(token = %auth.token, "signature mismatch");
        Err(invalid_token(&auth.token))
    }

    /// Capability lookup. `list_own` is inherently scoped to the caller
    /// and always allowed for a known token. Returns the entry's
    /// priority, which downstream consumers receive but never act on.
    pub async fn authorize(&self, envelope: &Envelope) -> Result<i32, Error> {
        let (Some(auth), Some(domain)) = (&envelope.auth, &envelope.domain) else {
            return Err(Error::Security("invalid (null) request".to_string()));
        };
        let entries = self.entries.read().await;
        let Some(data) = entries.get(&auth.token) else {
            return Err(permission_denied(envelope));
        };
        if envelope.command == Command::ListOwn {
            return Ok(data.priority);
        }
        for permission in &data.permissions {
            if permission.domain.matches(domain)
                && permission
                    .permitted
                    .iter()
                    .any(|c| *c == envelope.command || *c == Command::Any)
            {
                return Ok(data.priority);
            }
        }
        Err(permission_denied(envelope))
    }

    /// Swap in a fresh set of vault-sourced entries: stale vault entries
    /// are deleted, existing ones overwritten, new ones inserted. Config
    /// entries are never touched.
    pub async fn apply_vault_snapshot(&self, snapshot: HashMap<String, AuthData>) {
        let mut entries = self.entries.write().await;
        entries.retain(|token, data| {
            data.source == Source::Config || snapshot.contains_key(token)
        });
        for (token, data) in snapshot {
            // A config entry shadows a vault entry of the same name.
            let shadowed = entries
                .get(&token)
                .is_some_and(|existing| existing.source == Source::Config);
            if !shadowed {
                entries.insert(token, data);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn entry(&self, token: &str) -> Option<AuthData> {
        self.entries.read().await.get(token).cloned()
    }
}

fn invalid_token(token: &str) -> Error {
    tracing::debug!(token, "authentication failed");
    Error::Security("invalid token/secret".to_string())
}

fn permission_denied(envelope: &Envelope) -> Error {
    if let (Some(auth), Some(domain)) = (&envelope.auth, &envelope.domain) {
        tracing::debug!(
            token = %auth.token,
            command = %envelope.command,
            domain = %domain.name,
            view = %domain.view,
            "permission denied"
        );
    }
    Error::Security("permission denied".to_string())
}

/// Hex SHA-256 over the canonical request string for one time bucket:
/// `view‖name‖command‖Σ(type‖name‖data⋈"@")‖bucket`. The concatenation is
/// undelimited for compatibility with existing signers.
fn canonical_hash(envelope: &Envelope, bucket: i64) -> String {
    let mut s = String::new();
    if let Some(domain) = &envelope.domain {
        s.push_str(domain.view.as_str());
        s.push_str(&domain.name);
    }
    s.push_str(envelope.command.as_str());
    for record in &envelope.records {
        s.push_str(record.rtype.as_str());
        s.push_str(&record.name);
        s.push_str(&record.data.join("@"));
    }
    s.push_str(&bucket.to_string());
    hex::encode(Sha256::digest(s.as_bytes()))
}

fn signature(secret: &str, canonical: &str) -> String {
    hex::encode(Sha256::digest(format!("{secret}@{canonical}").as_bytes()))
}

/// Sign an envelope the way callers do: quantize `unix_time` to its
/// bucket and chain the secret into the canonical hash.
#[must_use]
pub fn sign_envelope(secret: &str, envelope: &Envelope, unix_time: i64) -> String {
    let bucket = unix_time - unix_time % TIME_BUCKET;
    signature(secret, &canonical_hash(envelope, bucket))
}
