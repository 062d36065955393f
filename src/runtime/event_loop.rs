//! Driving deferred work and event dispatch from a tokio `LocalSet`.

use std::time::Duration;

use tokio::task::JoinHandle;

use super::StateRuntime;

/// Default interval between pump ticks.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Periodically run deferred tasks and dispatch prepared devtools events.
///
/// Must be called from within a `LocalSet`. Abort the returned handle to stop.
pub fn spawn_pump(runtime: StateRuntime, tick: Duration) -> JoinHandle<()> {
    tokio::task::spawn_local(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let ran = runtime.run_deferred();
            let dispatched = runtime.mirror().pump();
            if ran > 0 || dispatched > 0 {
                tracing::trace!(ran, dispatched, "pump tick");
            }
        }
    })
}

/// Yield until no deferred task is queued and no devtools event is waiting to be
/// prepared. Never returns while an event preparation stays pending.
pub async fn settle(runtime: &StateRuntime) {
    loop {
        runtime.run_deferred();
        runtime.mirror().pump();
        if runtime.pending_deferred() == 0 && runtime.mirror().pending_events() == 0 {
            return;
        }
        tokio::task::yield_now().await;
    }
}
