//! Periodic token refresh from a Vault-style secret store.
//!
//! Each cycle renews our own store token, lists the configured path and
//! fetches one secret per key. The resulting snapshot replaces every
//! vault-sourced entry in the auth store atomically; a failed cycle
//! leaves the last known good set in place.

use crate::auth::{parse_permission, AuthData, SharedAuthStore, Source};
use crate::config::VaultConfig;
use crate::error::Error;
use reqwest::header::HeaderValue;
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";
const HTTP_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ListResponse {
    data: ListKeys,
}

#[derive(Deserialize)]
struct ListKeys {
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct SecretResponse {
    data: serde_json::Map<String, serde_json::Value>,
}

/// Run the refresh loop until the process exits. A failure of the very
/// first sync disables refreshing for the process lifetime; later
/// failures only log and leave the previous entries authoritative.
pub async fn refresh_loop(config: VaultConfig, store: SharedAuthStore) {
    let client = match http_client() {
        Ok(client) => client,
        Err(err) => {
            tracing::error!("secret-store client init failed; refresh disabled: {err}");
            return;
        }
    };
    if let Err(err) = sync(&client, &config, &store).await {
        tracing::error!("secret-store sync failed; further sync is disabled: {err}");
        return;
    }
    loop {
        tokio::time::sleep(config.ttl).await;
        if let Err(err) = sync(&client, &config, &store).await {
            tracing::warn!("secret-store sync failed: {err}");
        }
    }
}

fn http_client() -> Result<reqwest::Client, Error> {
    // The store commonly runs with internal certificates.
    Ok(reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .connect_timeout(HTTP_DEADLINE)
        .timeout(HTTP_DEADLINE)
        .build()?)
}

async fn sync(
    client: &reqwest::Client,
    config: &VaultConfig,
    store: &SharedAuthStore,
) -> Result<(), Error> {
    renew_self(client, config).await;

    let list_url = if config.url.ends_with('/') {
        config.url.clone()
    } else {
        format!("{}/", config.url)
    };
    let response = client
        .request(Method::from_bytes(b"LIST").expect("static method name"), &list_url)
        .header(VAULT_TOKEN_HEADER, header_token(config))
        .send()
        .await?;
    let listing: ListResponse = response.json().await?;
    tracing::debug!(tokens = listing.data.keys.len(), "secret store listed tokens");

    let mut snapshot = HashMap::with_capacity(listing.data.keys.len());
    for key in &listing.data.keys {
        match fetch_secret(client, config, &list_url, key).await {
            Ok(data) => {
                snapshot.insert(key.clone(), data);
            }
            Err(err) => {
                tracing::warn!(token = %key, "ignoring secret-store entry: {err}");
            }
        }
    }
    store.apply_vault_snapshot(snapshot).await;
    Ok(())
}

/// Best-effort renewal of our own store token; failures are ignored so a
/// store without renewable tokens still syncs.
async fn renew_self(client: &reqwest::Client, config: &VaultConfig) {
    let Some(base) = config.url.split("/v1").next().filter(|b| *b != config.url) else {
        return;
    };
    let renew_url = format!("{base}/v1/auth/token/renew-self");
    let _ = client
        .post(&renew_url)
        .header(VAULT_TOKEN_HEADER, header_token(config))
        .send()
        .await;
}

async fn fetch_secret(
    client: &reqwest::Client,
    config: &VaultConfig,
    list_url: &str,
    key: &str,
) -> Result<AuthData, Error> {
    let response = client
        .get(format!("{list_url}{key}"))
        .header(VAULT_TOKEN_HEADER, header_token(config))
        .send()
        .await?;
    let secret: SecretResponse = response.json().await?;
    Ok(auth_data_from_secret(key, &secret.data))
}

fn header_token(config: &VaultConfig) -> HeaderValue {
    HeaderValue::from_str(&config.token).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Translate one secret payload into an auth entry: the `secret` key is
/// the shared secret, every other string key is a permission spec.
fn auth_data_from_secret(
    token: &str,
    data: &serde_json::Map<String, serde_json::Value>,
) -> AuthData {
    let mut auth = AuthData {
        token: token.to_string(),
        secret: String::new(),
        permissions: Vec::new(),
        priority: 0,
        source: Source::Vault,
    };
    for (key, value) in data {
        let Some(value) = value.as_str() else {
            continue;
        };
        if key == "secret" {
            auth.secret = value.to_string();
            continue;
        }
        if let Some(permission) = parse_permission(key, value) {
            auth.permissions.push(permission);
        }
    }
    tracing::debug!(
        token,
        permissions = auth.permissions.len(),
        "loaded secret-store auth entry"
    );
    auth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Command, View};
    use serde_json::json;

    #[test]
    fn secret_payload_translates_to_auth_entry() {
        let payload = json!({
            "secret": "hunter2",
            "public,test.com": "create_record,list_records",
            "other.org": "list_records",
            "bogusview,x.com": "list_records",
            "numeric": 42
        });
        let data = auth_data_from_secret("robot", payload.as_object().unwrap());
        assert_eq!(data.token, "robot");
        assert_eq!(data.secret, "hunter2");
        assert_eq!(data.source, Source::Vault);
        assert_eq!(data.permissions.len(), 2);

        let public = data
            .permissions
            .iter()
            .find(|p| p.domain.name == "test.com")
            .unwrap();
        assert_eq!(public.domain.view, View::Public);
        assert_eq!(
            public.permitted,
            vec![Command::CreateRecord, Command::ListRecords]
        );

        let any = data
            .permissions
            .iter()
            .find(|p| p.domain.name == "other.org")
            .unwrap();
        assert_eq!(any.domain.view, View::Any);
    }

    #[test]
    fn list_response_shape() {
        let raw = r#"{"data": {"keys": ["robot1", "robot2"]}}"#;
        let listing: ListResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(listing.data.keys, vec!["robot1", "robot2"]);
    }
}
