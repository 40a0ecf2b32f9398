//! Dynamic rate limiting over a token bucket.
//!
//! The limiter owns exactly one bucket. Consumption is blocking: a ticket
//! is released only once its full token cost has been accounted for, so a
//! saturated workflow is slowed, never dropped. The bucket lock is held
//! across the starvation sleep, which keeps waiters ordered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::enforcement::response::{Response, ResponseStatus};
use crate::enforcement::tb_stats::{ObjectStatisticsRaw, TbStats};
use crate::enforcement::ticket::Ticket;
use crate::options;
use crate::status::Status;

/// How the bucket regains tokens: lazily at consume time, or from a
/// background task that tops it up every period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillMode {
    Arithmetic = 1,
    Threaded = 2,
}

impl RefillMode {
    /// Convert the optional initial-configuration value selecting the
    /// refill mode. Anything other than the threaded discriminator keeps
    /// the arithmetic default.
    pub fn from_i64(value: i64) -> RefillMode {
        match value {
            2 => RefillMode::Threaded,
            _ => RefillMode::Arithmetic,
        }
    }
}

/// Configuration operations understood by `DynamicRateLimiter::configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrlOperation {
    Init = 1,
    Rate = 2,
    Refill = 3,
}

impl DrlOperation {
    pub fn from_i32(value: i32) -> Option<DrlOperation> {
        match value {
            1 => Some(DrlOperation::Init),
            2 => Some(DrlOperation::Rate),
            3 => Some(DrlOperation::Refill),
            _ => None,
        }
    }

    pub fn from_token(token: &str) -> Option<DrlOperation> {
        match token {
            "init" => Some(DrlOperation::Init),
            "rate" => Some(DrlOperation::Rate),
            "refill" => Some(DrlOperation::Refill),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_period_us: u64,
    last_refill: Instant,
    mode: RefillMode,
    stats: Option<TbStats>,
    gc_window_us: u64,
}

impl TokenBucket {
    pub fn new(
        capacity: f64,
        tokens: f64,
        refill_period_us: u64,
        mode: RefillMode,
        collect_statistics: bool,
        gc_window_us: u64,
    ) -> TokenBucket {
        TokenBucket {
            capacity,
            tokens: tokens.clamp(0.0, capacity.max(0.0)),
            refill_period_us,
            last_refill: Instant::now(),
            mode,
            stats: collect_statistics.then(TbStats::default),
            gc_window_us,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn token_count(&self) -> f64 {
        self.tokens
    }

    pub fn refill_period_us(&self) -> u64 {
        self.refill_period_us
    }

    /// Tokens per second at the current capacity and period.
    pub fn rate_per_second(&self) -> f64 {
        if self.refill_period_us == 0 {
            return 0.0;
        }
        self.capacity / (self.refill_period_us as f64 / 1_000_000.0)
    }

    // Lazy refill: credit the elapsed fraction of a period, clamped to
    // capacity. Threaded buckets are topped up by their refill task
    // instead.
    fn refill(&mut self) {
        let now = Instant::now();
        if self.mode == RefillMode::Arithmetic && self.refill_period_us > 0 {
            let elapsed_us = now.duration_since(self.last_refill).as_micros() as f64;
            let added = self.capacity * (elapsed_us / self.refill_period_us as f64);
            self.tokens = (self.tokens + added).min(self.capacity);
        }
        self.last_refill = now;
    }

    fn set_capacity(&mut self, capacity: f64) {
        self.capacity = capacity.max(0.0);
        if self.tokens > self.capacity {
            self.tokens = self.capacity;
        }
    }

    fn set_tokens(&mut self, tokens: f64) {
        self.tokens = tokens.clamp(0.0, self.capacity);
    }
}

/// Rate-limiting enforcement object.
#[derive(Debug)]
pub struct DynamicRateLimiter {
    object_id: i64,
    bucket: Arc<Mutex<TokenBucket>>,
    collect_statistics: bool,
    cost_per_request: f64,
    refill_task: Option<tokio::task::JoinHandle<()>>,
    log: slog::Logger,
}

impl DynamicRateLimiter {
    pub fn new(
        object_id: i64,
        collect_statistics: bool,
        mode: RefillMode,
        shutdown: Arc<AtomicBool>,
        log: slog::Logger,
    ) -> DynamicRateLimiter {
        let bucket = Arc::new(Mutex::new(TokenBucket::new(
            options::DEFAULT_RATE,
            options::DEFAULT_RATE,
            options::DEFAULT_REFILL_PERIOD_US,
            mode,
            collect_statistics,
            options::DEFAULT_GC_SLIDING_WINDOW_US,
        )));

        let refill_task = match mode {
            RefillMode::Arithmetic => None,
            RefillMode::Threaded => Some(Self::spawn_refill_task(
                Arc::downgrade(&bucket),
                shutdown,
                log.clone(),
            )),
        };

        DynamicRateLimiter {
            object_id,
            bucket,
            collect_statistics,
            cost_per_request: options::DEFAULT_COST_PER_REQUEST,
            refill_task,
            log,
        }
    }

    // Periodic top-up for threaded buckets. The refill period is re-read
    // every iteration so configure operations retune the cadence of the
    // next sleep. The task exits when the stage shuts down or the limiter
    // is dropped.
    fn spawn_refill_task(
        bucket: Weak<Mutex<TokenBucket>>,
        shutdown: Arc<AtomicBool>,
        log: slog::Logger,
    ) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn(async move {
            loop {
                let period = match bucket.upgrade() {
                    Some(strong) => strong.lock().await.refill_period_us.max(1),
                    None => return,
                };
                tokio::time::sleep(Duration::from_micros(period)).await;
                if shutdown.load(Ordering::Relaxed) {
                    slog::debug!(log, "refill task observed shutdown");
                    break;
                }
                match bucket.upgrade() {
                    Some(strong) => {
                        let mut bucket = strong.lock().await;
                        bucket.tokens = bucket.capacity;
                        bucket.last_refill = Instant::now();
                    }
                    None => break,
                }
            }
        })
    }

    pub fn object_id(&self) -> i64 {
        self.object_id
    }

    /// Block until `requested` tokens have been consumed.
    pub async fn try_consume(&self, requested: f64) {
        let mut bucket = self.bucket.lock().await;
        loop {
            bucket.refill();
            if bucket.tokens >= requested {
                bucket.tokens -= requested;
                return;
            }

            let deficit = requested - bucket.tokens;
            if self.collect_statistics {
                let capacity = bucket.capacity;
                let tokens_left = bucket.tokens;
                if let Some(stats) = bucket.stats.as_mut() {
                    let normalized = if capacity > 0.0 {
                        (deficit / capacity) as f32
                    } else {
                        1.0
                    };
                    stats.store_stats_entry(normalized, tokens_left);
                }
            }

            // Wait long enough for the refill to cover the deficit. An
            // empty bucket can never satisfy the request; keep waiting a
            // full period at a time.
            let period = bucket.refill_period_us as f64;
            let wait_us = if bucket.capacity > 0.0 {
                (period * (deficit / bucket.capacity)).min(period).max(1.0)
            } else {
                period.max(1.0)
            };
            let wait = Duration::from_micros(wait_us as u64);
            if bucket.mode == RefillMode::Threaded {
                // The refill task needs the lock to top the bucket up.
                drop(bucket);
                tokio::time::sleep(wait).await;
                bucket = self.bucket.lock().await;
            } else {
                tokio::time::sleep(wait).await;
            }
        }
    }

    pub async fn enforce(&self, ticket: &Ticket, response: &mut Response) {
        self.try_consume(self.cost_per_request * ticket.payload() as f64)
            .await;

        let has_content = ticket.buffer_size() > 0;
        response.set_status(ResponseStatus::Success);
        response.set_has_content(has_content);
        if has_content {
            response.set_content(ticket.buffer());
        }
    }

    pub async fn configure(&self, operation: i32, values: &[i64]) -> Status {
        match DrlOperation::from_i32(operation) {
            Some(DrlOperation::Init) => {
                if values.len() < 2 {
                    return Status::error();
                }
                self.initialize(values[0].max(0) as u64, values[1] as f64).await;
                Status::ok()
            }
            Some(DrlOperation::Rate) => {
                if values.is_empty() {
                    return Status::error();
                }
                self.configure_rate(values[0] as f64).await;
                Status::ok()
            }
            Some(DrlOperation::Refill) => {
                if values.is_empty() {
                    return Status::error();
                }
                self.configure_refill_window(values[0].max(0) as u64).await;
                Status::ok()
            }
            None => Status::not_supported(),
        }
    }

    async fn initialize(&self, refill_period_us: u64, rate: f64) {
        let mut bucket = self.bucket.lock().await;
        bucket.refill_period_us = refill_period_us;
        bucket.set_capacity(rate);
        bucket.set_tokens(rate);
        bucket.last_refill = Instant::now();
        slog::debug!(
            self.log,
            "rate limiter initialized";
            "object_id" => self.object_id,
            "capacity" => bucket.capacity,
            "refill_period_us" => bucket.refill_period_us
        );
    }

    async fn configure_rate(&self, rate: f64) {
        let mut bucket = self.bucket.lock().await;
        bucket.set_capacity(rate);
    }

    // Change the refill window while holding the effective tokens-per-second
    // rate constant.
    async fn configure_refill_window(&self, window_us: u64) {
        let mut bucket = self.bucket.lock().await;
        let rate_per_second = bucket.rate_per_second();
        bucket.refill_period_us = window_us;
        let capacity = rate_per_second * (window_us as f64 / 1_000_000.0);
        bucket.set_capacity(capacity);
        bucket.set_tokens(capacity);
    }

    pub async fn collect_statistics(&self, raw: &mut ObjectStatisticsRaw) -> Status {
        if !self.collect_statistics {
            return Status::error();
        }
        let mut bucket = self.bucket.lock().await;
        let gc_window = bucket.gc_window_us;
        if let Some(stats) = bucket.stats.as_mut() {
            stats.gc_now(gc_window);
            stats.collect_stats(raw);
            raw.enforcement_object_id = self.object_id;
            Status::ok()
        } else {
            Status::error()
        }
    }

    pub async fn capacity(&self) -> f64 {
        self.bucket.lock().await.capacity()
    }

    pub async fn token_count(&self) -> f64 {
        self.bucket.lock().await.token_count()
    }

    pub async fn refill_period_us(&self) -> u64 {
        self.bucket.lock().await.refill_period_us()
    }
}

impl Drop for DynamicRateLimiter {
    fn drop(&mut self) {
        if let Some(task) = self.refill_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Display for DynamicRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rate limiter object ({})", self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    fn limiter(collect_statistics: bool) -> DynamicRateLimiter {
        DynamicRateLimiter::new(
            1,
            collect_statistics,
            RefillMode::Arithmetic,
            Arc::new(AtomicBool::new(false)),
            test_logger(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn consumption_is_capped_at_the_configured_rate() {
        let drl = limiter(false);
        // 1000 tokens per second, bucket starts full.
        drl.configure(DrlOperation::Init as i32, &[1_000_000, 1000])
            .await;

        let start = Instant::now();
        for _ in 0..3000 {
            drl.try_consume(1.0).await;
        }
        let elapsed = start.elapsed();

        // 3000 tokens at 1000 tokens/s with 1000 banked: about two seconds.
        assert!(elapsed >= Duration::from_millis(1900), "elapsed {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(2200), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn reconfiguring_the_rate_takes_effect_without_restart() {
        let drl = limiter(false);
        drl.configure(DrlOperation::Init as i32, &[1_000_000, 1000])
            .await;

        // Drain the banked tokens plus one period.
        for _ in 0..2000 {
            drl.try_consume(1.0).await;
        }

        let status = drl.configure(DrlOperation::Rate as i32, &[500]).await;
        assert!(status.is_ok());
        assert_eq!(drl.capacity().await, 500.0);
        assert!(drl.token_count().await <= 500.0);

        let start = Instant::now();
        for _ in 0..1000 {
            drl.try_consume(1.0).await;
        }
        let elapsed = start.elapsed();
        // 1000 tokens at 500 tokens/s: about two seconds.
        assert!(elapsed >= Duration::from_millis(1800), "elapsed {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(2400), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_window_keeps_the_rate_constant() {
        let drl = limiter(false);
        drl.configure(DrlOperation::Init as i32, &[1_000_000, 1000])
            .await;

        let status = drl.configure(DrlOperation::Refill as i32, &[500_000]).await;
        assert!(status.is_ok());
        assert_eq!(drl.refill_period_us().await, 500_000);
        assert_eq!(drl.capacity().await, 500.0);

        let mut bucket = drl.bucket.lock().await;
        assert!((bucket.rate_per_second() - 1000.0).abs() < 1e-6);
        bucket.refill();
        assert!(bucket.token_count() <= bucket.capacity());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_capacity_blocks_nonzero_requests() {
        let drl = limiter(false);
        drl.configure(DrlOperation::Init as i32, &[1_000_000, 0]).await;

        // A zero-token request passes immediately.
        drl.try_consume(0.0).await;

        // A one-token request can never be satisfied.
        let blocked = tokio::time::timeout(Duration::from_secs(5), drl.try_consume(1.0)).await;
        assert!(blocked.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_stay_within_bounds() {
        let drl = limiter(false);
        drl.configure(DrlOperation::Init as i32, &[1_000_000, 100]).await;

        for _ in 0..250 {
            drl.try_consume(1.0).await;
            let tokens = drl.token_count().await;
            let capacity = drl.capacity().await;
            assert!(tokens >= 0.0 && tokens <= capacity);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starvation_records_statistics() {
        let drl = limiter(true);
        drl.configure(DrlOperation::Init as i32, &[1_000_000, 10]).await;

        // Overrun the bucket so consumes have to wait and sample.
        for _ in 0..30 {
            drl.try_consume(1.0).await;
        }

        let mut raw = ObjectStatisticsRaw::default();
        let status = drl.collect_statistics(&mut raw).await;
        assert!(status.is_ok());
        assert!(!raw.entries.is_empty());
        for entry in &raw.entries {
            assert!(entry.normalized_empty_bucket >= 0.0);
            assert!(entry.tokens_left >= 0.0);
        }

        // Collection resets the ring.
        let mut again = ObjectStatisticsRaw::default();
        drl.collect_statistics(&mut again).await;
        assert!(again.entries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn statistics_disabled_reports_error() {
        let drl = limiter(false);
        let mut raw = ObjectStatisticsRaw::default();
        assert!(drl.collect_statistics(&mut raw).await.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn threaded_refill_tops_up_the_bucket() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let drl = DynamicRateLimiter::new(
            2,
            false,
            RefillMode::Threaded,
            Arc::clone(&shutdown),
            test_logger(),
        );
        drl.configure(DrlOperation::Init as i32, &[1_000_000, 100]).await;

        // Drain, then wait past a refill period.
        for _ in 0..100 {
            drl.try_consume(1.0).await;
        }
        assert!(drl.token_count().await < 1.0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(drl.token_count().await > 0.0);

        // A starved consume releases the lock while sleeping, so the
        // refill task can unblock it at the next period.
        for _ in 0..100 {
            drl.try_consume(1.0).await;
        }
        let unblocked =
            tokio::time::timeout(Duration::from_secs(3), drl.try_consume(50.0)).await;
        assert!(unblocked.is_ok());

        shutdown.store(true, Ordering::Relaxed);
    }

    #[tokio::test(start_paused = true)]
    async fn threaded_refill_follows_the_live_period() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let drl = DynamicRateLimiter::new(
            3,
            false,
            RefillMode::Threaded,
            Arc::clone(&shutdown),
            test_logger(),
        );
        drl.configure(DrlOperation::Init as i32, &[200_000, 100]).await;

        for _ in 0..100 {
            drl.try_consume(1.0).await;
        }
        assert!(drl.token_count().await < 1.0);

        // A sleep armed before the reconfiguration may still run at the
        // old period; give it one default window to drain.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(drl.token_count().await > 0.0);

        for _ in 0..100 {
            drl.try_consume(1.0).await;
        }
        assert!(drl.token_count().await < 1.0);

        // From here every sleep was armed after the init, so the top-up
        // arrives within the reconfigured 200ms window.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(drl.token_count().await > 0.0);

        shutdown.store(true, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn unsupported_operation_is_reported() {
        let drl = limiter(false);
        assert!(drl.configure(99, &[1]).await.is_not_supported());
        assert!(drl.configure(DrlOperation::Init as i32, &[1]).await.is_error());
    }
}
