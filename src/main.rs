//! # Departure Board Application Entry Point
//!
//! This binary wires the poller, the boards and the paging renderer together
//! and owns the transport's lifecycle. It supports both production mode (MQTT
//! broker driving an AWTRIX clock) and development mode (`--stdout`, every
//! frame printed instead of published).
//!
//! Any transport fault is fatal: the clock is cleared, the connection closed,
//! and the process exits non-zero so its supervisor can restart it.

// Test modules
#[cfg(test)]
mod tests;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;

// Re-export library types for internal use
pub use departure_board_lib::config::Config;

use departure_board_lib::board::BoardPipeline;
use departure_board_lib::ovapi::OvApiClient;
use departure_board_lib::polling::PollingSource;
use departure_board_lib::renderer::{PagingRenderer, RendererOptions};
use departure_board_lib::transport::{
    MemoryTransport, MqttTransport, Transport, TransportError,
};

/// How long the broker connection gets to flush the clear and disconnect.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

type Driver = JoinHandle<Result<(), TransportError>>;

/// Run until a fault or a shutdown signal, then clean up the clock.
///
/// `driver` is the broker event loop task; development mode has none.
async fn run<T: Transport>(
    config: Config,
    transport: Arc<T>,
    mut driver: Option<Driver>,
) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;
    let zone = config.timezone()?;

    let renderer = Arc::new(PagingRenderer::new(
        Arc::clone(&transport),
        RendererOptions {
            prefix: config.broker.prefix.clone(),
            slots: config.display.slots,
            render_interval: config.render_interval(),
        },
    ));

    let client = Arc::new(OvApiClient::new(&config.api.url, config.request_timeout())?);
    let poller = PollingSource::new(client, config.all_stop_codes(), config.refresh_interval());

    let mut boards = Vec::with_capacity(config.boards.len());
    for (board, start) in config.boards.iter().zip(config.board_offsets()) {
        let writer = renderer
            .reserve(start, board.max_items)
            .with_context(|| format!("board {}", board.name))?;
        let pipeline = BoardPipeline::new(
            board.name.clone(),
            board.stop_codes.clone(),
            board.cutoff_minutes,
            board.max_items,
            zone,
        );
        log::info!(
            "board {} on slots {:?}, stops {:?}",
            pipeline.name(),
            writer.range(),
            pipeline.stop_codes()
        );
        boards.push(pipeline.spawn(poller.subscribe(), writer));
    }

    let mut connection_lost = false;

    let outcome = match renderer.start().await {
        Ok(mut handle) => {
            let mut feed = poller.spawn();

            let outcome = tokio::select! {
                joined = &mut feed => match joined {
                    Ok(result) => result.context("departure feed failed"),
                    Err(e) => Err(anyhow::Error::new(e).context("departure feed task failed")),
                },
                result = handle.wait() => result.context("rendering failed"),
                result = watch_connection(driver.as_mut()) => {
                    connection_lost = true;
                    result.context("broker connection lost")
                }
                signal = shutdown_signal() => {
                    log::info!("received {signal}, shutting down");
                    Ok(())
                }
            };

            feed.abort();
            // Best effort: leave the clock blank rather than frozen on stale departures
            if let Err(e) = renderer.stop(handle).await {
                log::warn!("clearing the clock failed: {e}");
            }
            outcome
        }
        Err(e) => {
            if let Err(e) = renderer.clear().await {
                log::warn!("clearing the clock failed: {e}");
            }
            Err(anyhow::Error::new(e).context("starting renderer"))
        }
    };

    for board in &boards {
        board.abort();
    }

    if let Err(e) = transport.disconnect().await {
        log::warn!("disconnect failed: {e}");
    }
    if let Some(driver) = driver.filter(|_| !connection_lost) {
        // The event loop writes the queued clear, then ends on the disconnect
        match tokio::time::timeout(FLUSH_TIMEOUT, driver).await {
            Ok(Ok(Ok(()))) => log::info!("broker connection closed"),
            Ok(Ok(Err(e))) => log::warn!("broker connection ended with: {e}"),
            Ok(Err(e)) => log::warn!("broker task failed: {e}"),
            Err(_) => log::warn!("broker did not close within {FLUSH_TIMEOUT:?}"),
        }
    }

    outcome
}

/// Resolve when the broker event loop ends. Never resolves without one.
async fn watch_connection(driver: Option<&mut Driver>) -> Result<(), TransportError> {
    match driver {
        Some(driver) => match driver.await {
            Ok(result) => result,
            Err(e) => Err(TransportError::Task(e.to_string())),
        },
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        },
        Err(e) => {
            log::warn!("cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Development mode: print frames to stdout instead of publishing them
    let development_mode = env::args().any(|arg| arg == "--stdout");

    let config = Config::load();

    // Create Tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;

    let result = rt.block_on(async {
        if development_mode {
            log::info!("development mode: frames go to stdout");
            let transport = Arc::new(MemoryTransport::echoing());
            run(config, transport, None).await
        } else {
            let (transport, driver) = MqttTransport::connect(&config.broker);
            run(config, Arc::new(transport), Some(driver)).await
        }
    });

    if let Err(e) = &result {
        log::error!("{e:#}");
    }
    result
}
