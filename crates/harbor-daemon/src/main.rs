mod secrets;
mod state;

use anyhow::Context;
use chrono::Utc;
use state::DaemonState;
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let state = DaemonState::initialize()
        .await
        .context("failed to initialize harbor daemon")?;

    background_loop(&state).await;
    tracing::info!("harbor daemon stopped");
    Ok(())
}

/// Full sync cycles on the poll interval, snooze sweeps on their own
/// (shorter) interval, until Ctrl-C.
async fn background_loop(state: &DaemonState) {
    let mut sync_tick = interval(state.poll_interval());
    sync_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut snooze_tick = interval(state.snooze_sweep_interval());
    snooze_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = sync_tick.tick() => {
                match state.scheduler.run_cycle().await {
                    Ok(summary) if summary.failed > 0 => {
                        tracing::warn!(
                            failed = summary.failed,
                            synced = summary.initial_syncs + summary.delta_syncs,
                            "sync cycle finished with failures"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!("sync cycle failed: {err}"),
                }
            }
            _ = snooze_tick.tick() => {
                match state.scheduler.sweep_snoozes(Utc::now()).await {
                    Ok(woken) if woken > 0 => tracing::debug!(woken, "snoozed messages restored"),
                    Ok(_) => {}
                    Err(err) => tracing::warn!("snooze sweep failed: {err}"),
                }
            }
            signal = &mut shutdown => {
                if let Err(err) = signal {
                    tracing::error!("failed to listen for shutdown signal: {err}");
                }
                tracing::info!("shutdown requested");
                break;
            }
        }
    }
}
