//! Process configuration.
//!
//! The configuration is loaded once at startup and never mutated. It
//! carries the bus endpoints, the per-view database credentials, the
//! statically configured auth tokens and the secret-store settings.

use crate::error::Error;
use crate::model::View;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type SharedConfig = Arc<Config>;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// 0 = fatal only … 5 = trace. Overridden by `RUST_LOG` when set.
    #[serde(default)]
    pub loglevel: Option<u8>,
    #[serde(default)]
    pub amqp: Vec<AmqpConfig>,
    #[serde(default)]
    pub psql: Vec<PsqlConfig>,
    /// Statically configured tokens, keyed by token name. These survive
    /// every secret-store refresh untouched.
    #[serde(default)]
    pub auth: HashMap<String, AuthEntry>,
    #[serde(default)]
    pub vault: Option<VaultConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AmqpConfig {
    pub url: String,
    pub exchange: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PsqlConfig {
    pub host: String,
    #[serde(default = "default_psql_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(alias = "type")]
    pub view: View,
    #[serde(default)]
    pub ssl: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AuthEntry {
    pub secret: String,
    #[serde(default)]
    pub priority: i32,
    /// Permission specs of the form `"[view,]name": "cmd,cmd,…"`.
    #[serde(default)]
    pub permissions: HashMap<String, String>,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct VaultConfig {
    #[serde(default)]
    pub enable: bool,
    pub url: String,
    pub token: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_vault_ttl")]
    pub ttl: Duration,
}

fn default_psql_port() -> u16 {
    5432
}

fn default_vault_ttl() -> Duration {
    Duration::from_secs(600)
}

impl Config {
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        Ok(conf)
    }

    /// Default tracing filter directive derived from `loglevel`.
    #[must_use]
    pub fn default_log_filter(&self) -> &'static str {
        match self.loglevel {
            Some(0 | 1) => "zonewarden=error",
            Some(2) => "zonewarden=warn",
            Some(4) => "zonewarden=debug",
            Some(5) => "zonewarden=trace",
            _ => "zonewarden=info",
        }
    }
}

impl AmqpConfig {
    /// Bus URL with the scheme filled in when the operator left it off.
    #[must_use]
    pub fn normalized_url(&self) -> String {
        if self.url.starts_with("amqp://") || self.url.starts_with("amqps://") {
            self.url.clone()
        } else {
            format!("amqp://{}", self.url)
        }
    }
}

impl PsqlConfig {
    #[must_use]
    pub fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        };
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.database)
            .ssl_mode(ssl_mode);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        options
    }
}
