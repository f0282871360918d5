//! Venue Stream Client Binary
//!
//! Streams tickers for the configured instruments and, when credentials
//! are present, the private account channel, until Ctrl+C or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! STREAM_INSTRUMENTS=BTC-USDT,ETH-USDT cargo run --bin venue-stream-client
//! ```
//!
//! # Environment Variables
//!
//! - `OKX_ENV`: demo | live (default: demo)
//! - `OKX_SERVICE`: public | private | business (default: public)
//! - `OKX_WS_URL`: Endpoint override for `OKX_SERVICE`
//! - `OKX_API_KEY`, `OKX_SECRET_KEY`, `OKX_PASSPHRASE`: Login credentials
//! - `STREAM_INSTRUMENTS`: Comma-separated instrument IDs
//! - `STREAM_PROXY_URL`: HTTP CONNECT proxy
//! - `STREAM_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context as _;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use venue_stream_client::infrastructure::health::{HealthServer, HealthServerState};
use venue_stream_client::infrastructure::okx::{Balance, Candle, CandleBar, JsonCodec, Push, Ticker};
use venue_stream_client::infrastructure::telemetry;
use venue_stream_client::{Arg, ClientConfig, ServiceKind, StreamClient, init_metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a rustls crypto provider is already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting venue stream client");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let primary = StreamClient::new(config.clone());
    let mut clients = vec![primary.clone()];
    spawn_service_streams(&mut tasks, &primary, &config.instruments, &shutdown_token);

    if config.service != ServiceKind::Private && config.credentials.is_some() {
        let mut private_config = config.clone();
        private_config.service = ServiceKind::Private;
        private_config.ws_url = None;
        let private = StreamClient::new(private_config);
        spawn_service_streams(&mut tasks, &private, &[], &shutdown_token);
        clients.push(private);
    }

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        clients,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tasks.spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Stream client ready");

    await_shutdown(&shutdown_token).await;

    while tasks.join_next().await.is_some() {}

    tracing::info!("Stream client stopped");
    Ok(())
}

/// Start the default streams of `client`'s service.
fn spawn_service_streams(
    tasks: &mut JoinSet<()>,
    client: &StreamClient,
    instruments: &[String],
    shutdown: &CancellationToken,
) {
    match client.service() {
        ServiceKind::Public => {
            for inst_id in instruments {
                let arg = Arg::instrument("tickers", inst_id.as_str());
                supervise(tasks, client, shutdown, arg, log_ticker);
            }
        }
        ServiceKind::Business => {
            for inst_id in instruments {
                let arg = Arg::instrument(CandleBar::Minute1.channel(), inst_id.as_str());
                supervise(tasks, client, shutdown, arg, log_candle);
            }
        }
        ServiceKind::Private => {
            supervise(tasks, client, shutdown, Arg::new("account"), log_balance);
        }
    }
}

/// Run a typed subscription under retry until shutdown.
fn supervise<T, F>(
    tasks: &mut JoinSet<()>,
    client: &StreamClient,
    shutdown: &CancellationToken,
    arg: Arg,
    handler: F,
) where
    T: serde::de::DeserializeOwned + Send + 'static,
    F: Fn(Push<T>) + Send + Sync + 'static,
{
    let client = client.clone();
    let shutdown = shutdown.clone();
    let codec = JsonCodec::new();
    tasks.spawn(async move {
        let topic = arg.key();
        let result = client
            .subscribe_with_retry(&shutdown, arg, move |frame| {
                if frame.is_subscription_ack() {
                    tracing::info!(event = frame.event(), "Subscription acknowledged");
                    return;
                }
                match codec.decode_push::<T>(frame) {
                    Ok(push) => handler(push),
                    Err(e) => tracing::warn!(error = %e, "Dropping undecodable push"),
                }
            })
            .await;
        if let Err(e) = result {
            tracing::error!(service = %client.service(), %topic, error = %e, "Stream ended");
        }
    });
}

fn log_ticker(push: Push<Ticker>) {
    for ticker in push.data {
        tracing::info!(
            inst_id = %ticker.inst_id,
            last = ?ticker.last,
            bid = ?ticker.bid_px,
            ask = ?ticker.ask_px,
            "ticker"
        );
    }
}

fn log_candle(push: Push<Candle>) {
    let inst_id = push
        .arg
        .as_ref()
        .and_then(|arg| arg.inst_id.clone())
        .unwrap_or_default();
    for candle in push.data {
        tracing::info!(
            %inst_id,
            ts = candle.ts,
            close = %candle.close,
            confirmed = candle.confirmed,
            "candle"
        );
    }
}

fn log_balance(push: Push<Balance>) {
    for balance in push.data {
        tracing::info!(
            total_eq = ?balance.total_eq,
            currencies = balance.details.len(),
            "account"
        );
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        service = %config.service,
        instruments = config.instruments.len(),
        authenticated = config.credentials.is_some(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(url = %config.ws_url(), proxy = config.proxy.is_some(), "WebSocket endpoint");
}

/// Wait for SIGTERM or SIGINT, then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
