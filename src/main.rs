use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zonewarden::auth::{vault, AuthStore};
use zonewarden::bus;
use zonewarden::config::Config;
use zonewarden::store::Executor;

#[tokio::main]
async fn main() -> Result<()> {
    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("zonewarden".to_string()),
        first_args.next(),
    );
    let Some(config_file) = config_file else {
        return Err(anyhow!("usage: {program_name} /path/to/config.json"));
    };
    let config = Config::try_from_file(&config_file)?;
    tracing_init(&config);
    tracing::debug!("loaded config from {config_file}");

    let auth = AuthStore::from_config(&config.auth);
    if let Some(vault_config) = config.vault.clone().filter(|v| v.enable) {
        tracing::debug!("secret-store auth integration is enabled");
        tokio::spawn(vault::refresh_loop(vault_config, auth.clone()));
    }

    let executor = Arc::new(Executor::connect(&config.psql).await?);

    if config.amqp.is_empty() {
        return Err(anyhow!("no amqp consumers configured"));
    }
    let (exit_tx, mut exit_rx) = mpsc::channel::<()>(config.amqp.len());
    for (i, amqp) in config.amqp.iter().cloned().enumerate() {
        let auth = auth.clone();
        let executor = executor.clone();
        let exit = exit_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = bus::worker::run(amqp, auth, executor).await {
                tracing::error!("amqp consumer failed: {err}");
            }
            let _ = exit.send(()).await;
        });
        tracing::info!("running amqp consumer #{}", i + 1);
    }
    drop(exit_tx);

    let mut remaining = config.amqp.len();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("quitting from signal");
                break;
            }
            exited = exit_rx.recv() => {
                if exited.is_none() {
                    break;
                }
                remaining -= 1;
                if remaining == 0 {
                    tracing::info!("zero consumers left - exiting");
                    break;
                }
            }
        }
    }
    tracing::info!("goodbye");
    Ok(())
}

fn tracing_init(config: &Config) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_log_filter().into()),
        )
        .init();
}
