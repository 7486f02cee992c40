#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use beanstalk_pool::ProducerPool;
use bytes::Bytes;
use clap::Parser;
use config::{CliArgs, PutConfig};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use telemetry::init_telemetry;
use tokio::{io::AsyncReadExt, signal};
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = PutConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let body = match &config.body {
        Some(body) => Bytes::from(body.clone()),
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            Bytes::from(buf)
        }
    };

    let pool = Arc::new(ProducerPool::new(config.endpoints.clone(), config.options).await?);
    let config = Arc::new(config);

    let shutdown_token = CancellationToken::new();
    let signal_task = tokio::spawn({
        let shutdown_token = shutdown_token.clone();
        async move {
            shutdown_signal().await;
            #[cfg(feature = "tracing")]
            tracing::info!("Shutdown signal received, cancelling submitters...");
            shutdown_token.cancel();
        }
    });

    let tally = submit_all(
        Arc::clone(&pool),
        Arc::clone(&config),
        body,
        shutdown_token.clone(),
    )
    .await;

    signal_task.abort();
    pool.stop().await;
    providers.shutdown();

    check_tally(tally, config.count, shutdown_token.is_cancelled())
}

/// Turns the run's outcome into the process result. A run cut short by a
/// signal fails even when every attempted job succeeded.
fn check_tally(tally: Tally, count: usize, cancelled: bool) -> anyhow::Result<()> {
    if cancelled && tally.inserted + tally.failed < count {
        anyhow::bail!(
            "interrupted after {} of {count} jobs ({} failed)",
            tally.inserted,
            tally.failed
        );
    }
    if tally.failed > 0 {
        anyhow::bail!("{} of {count} jobs failed", tally.failed);
    }
    Ok(())
}

/// Outcome of a run, summed over all submitters.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    inserted: usize,
    failed: usize,
}

/// Submits `config.count` jobs from `config.concurrency` tasks sharing the
/// pool, printing each inserted id.
///
/// Cancelling `shutdown_token` makes every submitter abandon its current put
/// and stop taking jobs. All submitters have finished when this returns.
async fn submit_all(
    pool: Arc<ProducerPool>,
    config: Arc<PutConfig>,
    body: Bytes,
    shutdown_token: CancellationToken,
) -> Tally {
    let next_job = Arc::new(AtomicUsize::new(0));

    let submitters = (0..config.concurrency).map(|_submitter| {
        let pool = Arc::clone(&pool);
        let config = Arc::clone(&config);
        let next_job = Arc::clone(&next_job);
        let body = body.clone();
        let shutdown_token = shutdown_token.clone();

        tokio::spawn(async move {
            let mut tally = Tally::default();
            while !shutdown_token.is_cancelled()
                && next_job.fetch_add(1, Ordering::Relaxed) < config.count
            {
                let result = tokio::select! {
                    biased;
                    () = shutdown_token.cancelled() => break,
                    result = pool.put(&config.tube, body.clone(), config.params) => result,
                };

                match result {
                    Ok(id) => {
                        println!("{id}");
                        tally.inserted += 1;
                    }
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Submitter {_submitter} failed to put job: {e}");
                        eprintln!("put failed: {e}");
                        tally.failed += 1;
                    }
                }
            }
            tally
        })
    });

    futures::future::join_all(submitters)
        .await
        .into_iter()
        .fold(Tally::default(), |total, joined| {
            let tally = joined.unwrap_or(Tally {
                inserted: 0,
                failed: 1,
            });
            Tally {
                inserted: total.inserted + tally.inserted,
                failed: total.failed + tally.failed,
            }
        })
}

fn log_startup_info(_config: &PutConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Submitting jobs with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Submitting {} jobs to tube {:?} over {} connections",
            _config.count,
            _config.tube,
            _config.endpoints.len()
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}
