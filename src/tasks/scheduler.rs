use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::state::EngineState;
use crate::tasks::expiry;

pub(crate) async fn run(state: EngineState) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = vec![tokio::spawn(sweep_expired_loop(state.clone(), shutdown_rx))];

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn sweep_expired_loop(state: EngineState, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(state.settings().exam().sweep_interval_seconds);
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = expiry::sweep_expired(&state).await {
                    tracing::error!(error = %err, "sweep_expired failed");
                }
            }
        }
    }
}
