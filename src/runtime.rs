//! Scheduling loop
//!
//! Drives one [`ConnectivitySupervisor`] from a fixed-rate tokio interval
//! until the shutdown future resolves. Ticks are strictly sequential; the
//! supervisor never sees two calls at once.

use crate::error::SupervisorResult;
use crate::observability::supervisor_span;
use crate::supervisor::ConnectivitySupervisor;
use crate::transport::TransportClient;
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, Instrument};

/// Wall-clock source for the loop
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock that advances with tokio time, so paused-time tests see
/// elapsed intervals
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    anchor: Instant,
}

impl TokioClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            anchor: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor);
        self.origin + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// Run with the system clock until `shutdown` resolves
pub async fn run_until<T, F>(
    supervisor: &mut ConnectivitySupervisor<T>,
    shutdown: F,
) -> SupervisorResult<()>
where
    T: TransportClient,
    F: Future<Output = ()>,
{
    run_with_clock(supervisor, shutdown, &SystemClock).await
}

pub async fn run_with_clock<T, F, C>(
    supervisor: &mut ConnectivitySupervisor<T>,
    shutdown: F,
    clock: &C,
) -> SupervisorResult<()>
where
    T: TransportClient,
    F: Future<Output = ()>,
    C: Clock + ?Sized,
{
    let span = supervisor_span!(supervisor.config().broker.thing_name);
    drive(supervisor, shutdown, clock).instrument(span).await
}

async fn drive<T, F, C>(
    supervisor: &mut ConnectivitySupervisor<T>,
    shutdown: F,
    clock: &C,
) -> SupervisorResult<()>
where
    T: TransportClient,
    F: Future<Output = ()>,
    C: Clock + ?Sized,
{
    supervisor.start(clock.now()).await?;

    let mut ticker = tokio::time::interval(supervisor.config().tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let report = supervisor.tick(clock.now()).await;
                if !report.fired.is_empty() {
                    debug!(fired = ?report.fired, phase = %report.phase, "Tick");
                }
                if report.phase.is_terminal() {
                    break;
                }
            }
        }
    }

    supervisor.shutdown(clock.now()).await;
    Ok(())
}
