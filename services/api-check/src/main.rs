//! API check
//!
//! Small operator tool that drives the resilient client end to end:
//! 1. Loads the client config and seeds a session (env tokens or credential file)
//! 2. Issues a GET for every path given on the command line
//! 3. Logs each outcome and exits non-zero if any request failed

mod config;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use resilient_client::{ApiClient, Navigator, Notice, Notifier};
use session_auth::{Session, Tokens};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::CheckConfig;

/// Surfaces user notices as log lines.
struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        warn!(key = notice.key, message = notice.message, "notice");
    }
}

/// A check has no sign-in screen; record that one would be shown.
struct LogNavigator;

impl Navigator for LogNavigator {
    fn to_sign_in(&self, reason: &str) {
        warn!(reason, "session ended, sign-in required");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let config_path = CheckConfig::resolve_path(cli.config_path);
    info!(path = %config_path.display(), "loading configuration");
    let config = CheckConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        api_root = %config.client.api_root,
        mode = config.client.auth_mode().label(),
        timeout_ms = config.client.timeout_ms,
        retries = config.retry.retries,
        "configuration loaded"
    );

    let failures = run(config, &cli.paths).await?;

    if cli.render_metrics {
        println!("{}", prometheus_handle.render());
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} requests failed", cli.paths.len());
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
struct Cli<'a> {
    config_path: Option<&'a str>,
    render_metrics: bool,
    paths: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Cli<'_>> {
    let mut cli = Cli {
        config_path: None,
        render_metrics: false,
        paths: Vec::new(),
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().context("--config needs a path")?;
                cli.config_path = Some(value.as_str());
            }
            "--metrics" => cli.render_metrics = true,
            path => cli.paths.push(path.to_string()),
        }
    }
    if cli.paths.is_empty() {
        anyhow::bail!("usage: api-check [--config PATH] [--metrics] API_PATH...");
    }
    Ok(cli)
}

/// Build the client from `config`, GET every path, and return how many failed.
async fn run(config: CheckConfig, paths: &[String]) -> Result<usize> {
    let mode = config.client.auth_mode();
    let session = match &config.session.credentials_file {
        Some(path) => Session::load(mode, path.clone())
            .await
            .with_context(|| format!("failed to load credentials from {}", path.display()))?,
        None => Session::new(mode),
    };
    let session = Arc::new(session);

    let transport = config
        .client
        .transport()
        .context("failed to build HTTP transport")?;

    let policy = config.retry.policy().on_retry(|attempt, delay, e| {
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            kind = e.kind.label(),
            "retrying"
        );
    });
    let client = ApiClient::builder(session, Arc::new(transport))
        .timeout(config.client.timeout())
        .retry_policy(policy)
        .notifier(Arc::new(LogNotifier))
        .navigator(Arc::new(LogNavigator))
        .build();

    let CheckConfig { session: seed, .. } = config;
    if seed.access_token.is_some() || seed.refresh_token.is_some() {
        client
            .login(Tokens {
                access: seed.access_token,
                refresh: seed.refresh_token,
            })
            .await;
    }

    let mut failures = 0;
    for path in paths {
        match client.get(path).await {
            Ok(response) => info!(
                path = %path,
                status = response.status.as_u16(),
                bytes = response.body.len(),
                "request succeeded"
            ),
            Err(e) => {
                error!(
                    path = %path,
                    kind = e.kind.label(),
                    status = e.status.map(|s| s.as_u16()),
                    request_id = e.request_id.as_deref().unwrap_or_default(),
                    error = %e.message,
                    "request failed"
                );
                failures += 1;
            }
        }
    }

    client.dispose();
    Ok(failures)
}
