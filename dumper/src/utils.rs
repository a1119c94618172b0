use std::future::Future;
use std::io;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Exit status used when a second interrupt aborts the dump.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Installs the global subscriber. Output goes to stderr; stdout may be carrying the dump.
pub fn init_tracing(verbosity: u8) -> Result<()> {
    let default_directive = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        warn!("tracing subscriber already initialized");
    }

    Ok(())
}

/// Raises `cancel` on the first Ctrl-C or SIGTERM so the dump can stop at a page boundary,
/// flush its output and report. A second signal exits immediately.
pub fn cancel_on_interrupt(cancel: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    thread::Builder::new()
        .name("interrupt-watch".into())
        .spawn(move || {
            runtime.block_on(async move {
                cancel_after(shutdown_signal(), &cancel).await;
                shutdown_signal().await;
                error!("interrupted again, aborting without flushing output");
                process::exit(INTERRUPTED_EXIT_CODE);
            })
        })
        .context("failed to spawn interrupt watcher")?;

    Ok(())
}

async fn cancel_after(signal: impl Future<Output = ()>, cancel: &AtomicBool) {
    signal.await;
    cancel.store(true, Ordering::Relaxed);
    warn!("interrupt received, finishing in-flight pages (interrupt again to abort)");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(?err, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(?err, "failed to listen for TERM signal");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
