//! Client/server clock offset estimation.
//!
//! On every interval the sampler records the local transmit time, asks the
//! server for its time and, once the answer arrives, estimates
//!
//! ```text
//! rtt   = received - transmitted
//! delta = server_time - rtt / 2 - transmitted
//! ```
//!
//! The estimate assumes the request and the response spend equal time on the
//! network. Asymmetric latency skews it by half the asymmetry; the median over a
//! short history smooths out single outliers, not systematic bias.

use crate::cancel::CancellationToken;
use crate::config::ClockSyncConfig;
use crate::Result;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Options for [`ClockSync`].
#[derive(Debug, Clone)]
pub struct ClockSyncOptions {
    /// Time between samples. The first sample is taken immediately.
    pub interval: Duration,
    /// Number of deltas kept; the oldest is evicted first.
    pub capacity: usize,
}

impl Default for ClockSyncOptions {
    fn default() -> Self {
        Self {
            interval: ClockSyncConfig::SAMPLE_INTERVAL,
            capacity: ClockSyncConfig::SAMPLE_CAPACITY,
        }
    }
}

impl ClockSyncOptions {
    /// Intervals shorter than [`ClockSyncConfig::MIN_SAMPLE_INTERVAL`] are raised to it.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(ClockSyncConfig::MIN_SAMPLE_INTERVAL);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

/// Bounded history of clock deltas in milliseconds.
#[derive(Debug, Clone)]
pub struct DeltaHistory {
    deltas: VecDeque<i64>,
    capacity: usize,
}

impl Default for DeltaHistory {
    fn default() -> Self {
        Self::new(ClockSyncConfig::SAMPLE_CAPACITY)
    }
}

impl DeltaHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            deltas: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Append a delta, evicting the oldest once full, and return the new median.
    pub fn record(&mut self, delta: i64) -> i64 {
        while self.deltas.len() >= self.capacity {
            self.deltas.pop_front();
        }
        self.deltas.push_back(delta);
        self.median()
    }

    /// Median of the history; the mean of the middle pair when even, 0 when empty.
    pub fn median(&self) -> i64 {
        if self.deltas.is_empty() {
            return 0;
        }
        let mut sorted: Vec<i64> = self.deltas.iter().copied().collect();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            // i128 so two large offsets cannot overflow when summed
            ((sorted[mid - 1] as i128 + sorted[mid] as i128) / 2) as i64
        } else {
            sorted[mid]
        }
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn clear(&mut self) {
        self.deltas.clear();
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Offset of the server clock relative to the local clock.
pub fn compute_delta(transmitted: i64, received: i64, server_time: i64) -> i64 {
    let rtt = received - transmitted;
    server_time - rtt / 2 - transmitted
}

/// Periodic clock-offset sampler.
#[derive(Debug)]
pub struct ClockSync {
    options: ClockSyncOptions,
    history: Arc<Mutex<DeltaHistory>>,
    delta_tx: Arc<watch::Sender<i64>>,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new(ClockSyncOptions::default())
    }
}

impl ClockSync {
    pub fn new(options: ClockSyncOptions) -> Self {
        let (delta_tx, _) = watch::channel(0);
        Self {
            history: Arc::new(Mutex::new(DeltaHistory::new(options.capacity))),
            options,
            delta_tx: Arc::new(delta_tx),
            token: None,
            task: None,
        }
    }

    /// Start sampling with `sample`, which resolves to the server's time in
    /// milliseconds since the Unix epoch.
    ///
    /// Restarts the sampler if it is already running. Must be called from
    /// within a tokio runtime.
    pub fn start<F, Fut>(&mut self, mut sample: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<i64>> + Send + 'static,
    {
        self.stop();

        let token = CancellationToken::new();
        let task_token = token.clone();
        let history = self.history.clone();
        let delta_tx = self.delta_tx.clone();
        let interval = self.options.interval.max(ClockSyncConfig::MIN_SAMPLE_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if task_token.is_cancelled() {
                    break;
                }

                let transmitted = now_millis();
                let server_time = match sample().await {
                    Ok(time) => time,
                    Err(e) => {
                        warn!("Clock sync sample failed: {}", e);
                        continue;
                    }
                };
                if task_token.check().is_err() {
                    break;
                }

                let delta = compute_delta(transmitted, now_millis(), server_time);
                let median = history
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(delta);
                debug!("Clock delta sample {}ms, median {}ms", delta, median);
                delta_tx.send_replace(median);
            }
        });

        self.token = Some(token);
        self.task = Some(task);
    }

    /// Stop sampling and clear the history.
    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.lock_history().clear();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Median of the recorded deltas in milliseconds (0 before any sample).
    pub fn delta(&self) -> i64 {
        self.lock_history().median()
    }

    /// Receive the updated median after every successful sample.
    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.delta_tx.subscribe()
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, DeltaHistory> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ClockSync {
    fn drop(&mut self) {
        self.stop();
    }
}
