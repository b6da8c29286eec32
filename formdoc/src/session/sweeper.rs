//! Background expiry of idle sessions.

use super::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// A running sweep loop. Dropping the handle also ends the loop.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        self.stop.send_replace(true);
        let _ = self.task.await;
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Calls [`SessionRegistry::sweep_idle`] every `interval`.
#[derive(Debug, Clone)]
pub struct SessionSweeper {
    registry: Arc<SessionRegistry>,
    interval: Duration,
}

impl SessionSweeper {
    /// Sweep `registry` every `interval`. A zero interval is raised to one
    /// millisecond.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Time between sweeps.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the loop. The first sweep happens one interval from now.
    #[must_use]
    pub fn start(&self) -> SweeperHandle {
        let (stop, mut stopped) = watch::channel(false);
        let registry = Arc::clone(&self.registry);
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(?period, "idle session sweeper running");

            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        let expired = registry.sweep_idle().await;
                        if expired > 0 {
                            debug!(expired, "idle sessions expired");
                        }
                    }
                    () = async { let _ = stopped.wait_for(|stop| *stop).await; } => break,
                }
            }
            debug!("idle session sweeper stopped");
        });

        SweeperHandle { stop, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use crate::session::registry::SessionConfig;

    fn registry(idle: Duration) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::with_config(
            Script::claim_response(),
            SessionConfig {
                idle_timeout: Some(idle),
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_expire() {
        let registry = registry(Duration::from_secs(10));
        registry.begin("idle").await;

        let handle = SessionSweeper::new(Arc::clone(&registry), Duration::from_secs(5)).start();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.active_count().await, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.active_count().await, 0);

        assert!(!handle.is_finished());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_sweep() {
        let registry = registry(Duration::from_secs(1));
        registry.begin("chat").await;

        let sweeper = SessionSweeper::new(Arc::clone(&registry), Duration::from_secs(60));
        assert_eq!(sweeper.interval(), Duration::from_secs(60));
        sweeper.start().stop().await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(registry.active_count().await, 1);
    }

    #[test]
    fn test_zero_interval_is_raised() {
        let sweeper = SessionSweeper::new(registry(Duration::from_secs(1)), Duration::ZERO);
        assert_eq!(sweeper.interval(), Duration::from_millis(1));
    }
}
