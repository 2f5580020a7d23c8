// SPDX-License-Identifier: MIT

//! `ufds-replicator`: loads a TOML config, wires a `repl_engine::Controller`
//! to a real `ldap3` local client and one `LdapRemote` per configured
//! remote, and drives the poll/backoff loop until a shutdown signal
//! arrives.

use anyhow::{Context, Result};
use clap::Parser;
use repl_daemon::Config;
use repl_directory::ldap::{LdapClient, LdapConnParams, LdapRemote};
use repl_directory::{LocalClient, RemoteDirectory, RemoteIdentity};
use repl_engine::{Controller, Remote, ReplicatorObserver, State, TracingObserver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ufds-replicator", about = "One-way UFDS directory replicator")]
struct Cli {
    /// Path to the replicator's TOML config file.
    #[arg(short, long, default_value = "/etc/ufds-replicator/config.toml")]
    config: PathBuf,
}

fn build_controller(config: &Config) -> Result<Controller> {
    let local = Arc::new(LdapClient::new(LdapConnParams {
        url: config.local.url.clone(),
        bind_dn: config.local.bind_dn.clone(),
        bind_credentials: config.local.bind_credentials.clone(),
    }));
    let local_dyn: Arc<dyn LocalClient> = local;

    let remotes = config
        .remotes
        .iter()
        .map(|rc| {
            let (matcher, raw_queries) =
                rc.matcher_and_raw().with_context(|| format!("remote {} has an invalid filter", rc.url))?;
            let identity = RemoteIdentity { url: rc.url.clone(), uuid: rc.uuid.clone() };
            let params = LdapConnParams {
                url: rc.url.clone(),
                bind_dn: rc.bind_dn.clone(),
                bind_credentials: rc.bind_credentials.clone(),
            };
            let connection = Arc::new(LdapRemote::new(params, identity, raw_queries, matcher, rc.changelog_base.clone()));
            let connection_dyn: Arc<dyn RemoteDirectory> = connection;
            Ok(Remote::new(rc.url.clone(), connection_dyn))
        })
        .collect::<Result<Vec<_>>>()?;

    let observer: Arc<dyn ReplicatorObserver> = Arc::new(TracingObserver);
    Controller::new(local_dyn, remotes, config.checkpoint_base(), config.checkpoint_objectclass.as_str(), observer)
        .context("failed to construct controller")
}

/// Resolves when either SIGINT or SIGTERM arrives.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler, watching SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c");
}

/// The steady-state loop (spec §4.4): a fixed-interval poll pass while
/// `state == poll`, or a `resume()` retry while suspended — spaced by the
/// exponential backoff when one is armed (an init-time failure, spec
/// §4.1), or by the plain poll interval when it isn't (a transient
/// connect/I-O failure, spec §4.2/§7's "suspend → reconnect → resume").
/// Either way `resume()` is a no-op unless `state == wait`, so retrying it
/// unconditionally on every `wait` tick is always safe.
async fn run(mut controller: Controller, poll_interval: Duration) -> Result<()> {
    controller.start().await.context("initial start() failed")?;

    loop {
        let wait = match controller.state() {
            State::Destroy => break,
            State::Poll => poll_interval,
            State::Wait => Duration::from_millis(controller.backoff().current_ms().unwrap_or(poll_interval.as_millis() as u64)),
            State::Process | State::Init => poll_interval,
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = wait_for_shutdown_signal() => {
                tracing::info!("shutting down");
                controller.destroy().await;
                break;
            }
        }

        match controller.state() {
            State::Poll => {
                if let Err(err) = controller.poll_pass(None).await {
                    tracing::error!(error = %err, "poll pass failed");
                }
            }
            State::Wait => {
                if let Err(err) = controller.on_backoff_fire().await {
                    tracing::error!(error = %err, "resume failed again");
                }
            }
            _ => {}
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let controller = build_controller(&config)?;

    run(controller, poll_interval).await
}
