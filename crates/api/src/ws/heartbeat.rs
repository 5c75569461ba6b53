use std::sync::Arc;
use std::time::Duration;

use actlocal_events::Broadcaster;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Ping period for connected dashboards.
pub const PING_PERIOD: Duration = Duration::from_secs(30);

/// Keep dashboard sockets alive by pinging every subscriber each
/// [`PING_PERIOD`]. Ticks with nobody connected are skipped.
///
/// The daemon aborts the returned handle on shutdown.
pub fn start_heartbeat(broadcaster: Arc<Broadcaster>) -> JoinHandle<()> {
    spawn_pinger(broadcaster, PING_PERIOD)
}

fn spawn_pinger(broadcaster: Arc<Broadcaster>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        // A stalled runtime should not produce a burst of catch-up pings.
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;
            match broadcaster.subscriber_count().await {
                0 => continue,
                subscribers => {
                    tracing::trace!(subscribers, "Pinging dashboard sockets");
                    broadcaster.ping_all().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use actlocal_events::{Outbound, RunEvent};

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_pings() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut rx = broadcaster
            .subscribe("dash".into(), || RunEvent::Hello { runs: Vec::new() })
            .await;
        let pinger = spawn_pinger(Arc::clone(&broadcaster), Duration::from_millis(20));

        assert!(matches!(rx.recv().await, Some(Outbound::Event(_))));
        let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(matches!(next, Some(Outbound::Ping)));

        pinger.abort();
    }
}
