use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::*;
use crate::server::rtc::{EngineStats, PeerEngine};

/// Advisory connection quality, recomputed every sampling interval.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub round_trip_time_ms: Option<f64>,
    pub outgoing_bitrate_kbps: f64,
    pub incoming_bitrate_kbps: f64,
    pub path_type: Option<String>,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Default)]
struct BoardInner {
    active: bool,
    latest: Option<StatsSnapshot>,
    previous: Option<(EngineStats, Instant)>,
}

/// Shared slot the sampler writes and UIs read. Writes only land while the
/// board is active, so `deactivate` returning means no more writes.
#[derive(Clone, Default)]
pub struct StatsBoard {
    inner: Arc<Mutex<BoardInner>>,
}

impl StatsBoard {
    pub fn latest(&self) -> Option<StatsSnapshot> {
        self.lock().latest.clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    fn activate(&self) {
        let mut inner = self.lock();
        inner.active = true;
        inner.previous = None;
    }

    fn deactivate(&self) {
        self.lock().active = false;
    }

    // false once deactivated; the sample is discarded
    fn record(&self, stats: EngineStats, now: Instant) -> bool {
        let mut inner = self.lock();
        if !inner.active {
            return false;
        }
        let snapshot = derive_snapshot(inner.previous.as_ref(), &stats, now);
        inner.latest = Some(snapshot);
        inner.previous = Some((stats, now));
        true
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn kbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / 1000.0 / secs
}

fn derive_snapshot(
    previous: Option<&(EngineStats, Instant)>,
    current: &EngineStats,
    now: Instant,
) -> StatsSnapshot {
    let (outgoing, incoming) = match previous {
        Some((prev, at)) => {
            let elapsed = now.saturating_duration_since(*at);
            (
                kbps(current.bytes_sent.saturating_sub(prev.bytes_sent), elapsed),
                kbps(current.bytes_received.saturating_sub(prev.bytes_received), elapsed),
            )
        }
        None => (0.0, 0.0),
    };
    StatsSnapshot {
        round_trip_time_ms: current.round_trip_time_ms,
        outgoing_bitrate_kbps: outgoing,
        incoming_bitrate_kbps: incoming,
        path_type: current.path_type.clone(),
        sampled_at: Utc::now(),
    }
}

/// Periodic reader of engine stats. Never touches call state.
pub struct StatsSampler {
    board: StatsBoard,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl StatsSampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            board: StatsBoard::default(),
            interval,
            task: None,
        }
    }

    pub fn board(&self) -> StatsBoard {
        self.board.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn start(&mut self, engine: Arc<dyn PeerEngine>) {
        if self.task.is_some() {
            return;
        }
        self.board.activate();
        let board = self.board.clone();
        let interval = self.interval;
        debug!("stats sampling every {:?}", interval);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match engine.get_stats().await {
                    Ok(stats) => {
                        if !board.record(stats, Instant::now()) {
                            break;
                        }
                    }
                    Err(e) => debug!("stats read failed: {}", e),
                }
            }
        }));
    }

    /// After this returns the board never changes again.
    pub fn stop(&mut self) {
        self.board.deactivate();
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("stats sampling stopped");
        }
    }
}

impl Drop for StatsSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::testing::FakeEngine;

    #[test]
    fn bitrate_comes_from_byte_deltas() {
        let t0 = Instant::now();
        let first = EngineStats {
            bytes_sent: 1_000,
            bytes_received: 500,
            round_trip_time_ms: Some(42.0),
            path_type: Some("srflx".to_string()),
        };
        let snap = derive_snapshot(None, &first, t0);
        assert_eq!(snap.outgoing_bitrate_kbps, 0.0);
        assert_eq!(snap.round_trip_time_ms, Some(42.0));

        let second = EngineStats {
            bytes_sent: 126_000,
            bytes_received: 250_500,
            ..first.clone()
        };
        let snap = derive_snapshot(Some(&(first, t0)), &second, t0 + Duration::from_secs(2));
        assert_eq!(snap.outgoing_bitrate_kbps, 500.0);
        assert_eq!(snap.incoming_bitrate_kbps, 1000.0);
        assert_eq!(snap.path_type.as_deref(), Some("srflx"));
    }

    #[test]
    fn counter_reset_does_not_go_negative() {
        let t0 = Instant::now();
        let prev = EngineStats {
            bytes_sent: 10_000,
            ..Default::default()
        };
        let snap = derive_snapshot(
            Some(&(prev, t0)),
            &EngineStats::default(),
            t0 + Duration::from_secs(1),
        );
        assert_eq!(snap.outgoing_bitrate_kbps, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_until_stopped() {
        let engine = Arc::new(FakeEngine::default());
        let mut sampler = StatsSampler::new(Duration::from_secs(1));
        let board = sampler.board();
        sampler.start(engine.clone());
        assert!(sampler.is_running());

        engine.set_stats(EngineStats {
            bytes_sent: 1_000,
            ..Default::default()
        });
        time::sleep(Duration::from_millis(1500)).await;
        assert!(board.latest().is_some());

        engine.set_stats(EngineStats {
            bytes_sent: 126_000,
            ..Default::default()
        });
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(board.latest().unwrap().outgoing_bitrate_kbps, 1000.0);

        sampler.stop();
        assert!(!board.is_active());
        let frozen = board.latest();
        engine.set_stats(EngineStats {
            bytes_sent: 999_000,
            ..Default::default()
        });
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(board.latest(), frozen);
    }

    #[test]
    fn inactive_board_discards_samples() {
        let board = StatsBoard::default();
        assert!(!board.record(EngineStats::default(), Instant::now()));
        assert!(board.latest().is_none());
    }
}
