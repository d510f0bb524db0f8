use super::context::AppContext;
use anyhow::Result;
use parley_application::HistorySync;
use parley_core::signal::{Signal, SignalBus};
use tokio::sync::broadcast::error::RecvError;

pub async fn run(ctx: &AppContext) -> Result<()> {
    let mut signals = ctx.bus.subscribe();
    let handle = HistorySync::new(ctx.history.clone(), ctx.bus.clone(), ctx.config.sync.clone()).start();
    println!("Watching history (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            signal = signals.recv() => match signal {
                Ok(Signal::HistoryUpdated { reason, timestamp }) => {
                    let count = ctx.history.get_history().await.len();
                    println!("{} history:updated ({}) - {} conversation(s)", timestamp, reason, count);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await;
    Ok(())
}
