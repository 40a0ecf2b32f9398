//! Channels: the routing units requests flow through.
//!
//! A channel owns one submission/completion queue pair, the enforcement
//! objects installed by housekeeping rules, and per-operation statistics.
//! Requests are turned into tickets here; ticket ids are assigned
//! monotonically per channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::context::Context;
use crate::differentiation::ObjectDifferentiationPair;
use crate::enforcement::object::{EnforcementObject, NoopObject, ObjectType};
use crate::enforcement::queue::{CompletionQueue, SubmissionQueue};
use crate::enforcement::rate_limiter::{DrlOperation, DynamicRateLimiter, RefillMode};
use crate::enforcement::response::{Response, ResponseStatus};
use crate::enforcement::tb_stats::ObjectStatisticsRaw;
use crate::enforcement::ticket::Ticket;
use crate::status::Status;

/// Aggregated channel counters handed to the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelStatsRaw {
    pub channel_id: i64,
    pub total_operations: i64,
    pub total_bytes: i64,
    pub windowed_operations: i64,
    pub windowed_bytes: i64,
}

// Per-operation-entry counters. The windowed half resets at every general
// collection so the control plane sees both lifetime and since-last-poll
// activity.
#[derive(Debug, Default)]
struct ChannelStatisticsInner {
    entries: HashMap<i32, (i64, i64)>,
    total_operations: i64,
    total_bytes: i64,
    windowed_operations: i64,
    windowed_bytes: i64,
}

#[derive(Debug, Default)]
pub struct ChannelStatistics {
    inner: std::sync::Mutex<ChannelStatisticsInner>,
}

impl ChannelStatistics {
    fn record(&self, operation_entry: i32, bytes: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            let entry = inner.entries.entry(operation_entry).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += bytes as i64;
            inner.total_operations += 1;
            inner.total_bytes += bytes as i64;
            inner.windowed_operations += 1;
            inner.windowed_bytes += bytes as i64;
        }
    }

    fn collect_general(&self, channel_id: i64, raw: &mut ChannelStatsRaw) -> Status {
        match self.inner.lock() {
            Ok(mut inner) => {
                raw.channel_id = channel_id;
                raw.total_operations = inner.total_operations;
                raw.total_bytes = inner.total_bytes;
                raw.windowed_operations = inner.windowed_operations;
                raw.windowed_bytes = inner.windowed_bytes;
                inner.windowed_operations = 0;
                inner.windowed_bytes = 0;
                Status::ok()
            }
            Err(_) => Status::error(),
        }
    }

    fn collect_detailed(&self, entries: &mut Vec<f64>) -> Status {
        match self.inner.lock() {
            Ok(inner) => {
                for (operation, (operations, bytes)) in inner.entries.iter() {
                    entries.push(*operation as f64);
                    entries.push(*operations as f64);
                    entries.push(*bytes as f64);
                }
                Status::ok()
            }
            Err(_) => Status::error(),
        }
    }

    fn collect_entry(&self, channel_id: i64, operation: i32, raw: &mut ChannelStatsRaw) -> Status {
        match self.inner.lock() {
            Ok(inner) => match inner.entries.get(&operation) {
                Some((operations, bytes)) => {
                    raw.channel_id = channel_id;
                    raw.total_operations = *operations;
                    raw.total_bytes = *bytes;
                    Status::ok()
                }
                None => Status::not_found(),
            },
            Err(_) => Status::error(),
        }
    }
}

#[derive(Debug)]
pub struct Channel {
    channel_id: i64,
    queue: Arc<SubmissionQueue>,
    completion: Arc<CompletionQueue>,
    statistics: ChannelStatistics,
    object_tokens: std::sync::Mutex<HashMap<i64, u32>>,
    ticket_ids: AtomicU64,
    worker: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    log: slog::Logger,
}

impl Channel {
    pub fn new(channel_id: i64, shutdown: Arc<AtomicBool>, log: slog::Logger) -> Channel {
        let log = log.new(slog::o!("channel" => channel_id));
        let completion = Arc::new(CompletionQueue::new(log.clone()));
        let queue = Arc::new(SubmissionQueue::new(Arc::clone(&completion), log.clone()));
        Channel {
            channel_id,
            queue,
            completion,
            statistics: ChannelStatistics::default(),
            object_tokens: std::sync::Mutex::new(HashMap::new()),
            ticket_ids: AtomicU64::new(1),
            worker: std::sync::Mutex::new(None),
            shutdown,
            log,
        }
    }

    pub fn channel_id(&self) -> i64 {
        self.channel_id
    }

    /// Requests bypassed by the no-match object.
    pub fn bypass_count(&self) -> u64 {
        self.queue.no_match_count()
    }

    pub fn define_object_differentiation(&self, operation_type: bool, operation_context: bool) {
        self.queue
            .define_object_differentiation(operation_type, operation_context);
    }

    /// Run this channel's enforcement through a background worker instead
    /// of the caller's task.
    pub fn start_worker(&self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            *guard = Some(self.queue.start_worker());
            slog::debug!(self.log, "channel worker started");
        }
    }

    pub fn stop_worker(&self) {
        self.queue.stop_worker();
        if let Ok(mut guard) = self.worker.lock() {
            guard.take();
        }
    }

    fn has_worker(&self) -> bool {
        self.worker
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn next_ticket_id(&self) -> u64 {
        self.ticket_ids.fetch_add(1, Ordering::Relaxed)
    }

    fn build_ticket(&self, context: &Context, buffer: &[u8]) -> Ticket {
        let payload = (context.operation_size() as i64).max(1);
        if buffer.is_empty() {
            Ticket::new(
                self.next_ticket_id(),
                context.total_operations(),
                payload,
                context.operation_type(),
                context.operation_context(),
            )
        } else {
            Ticket::with_buffer(
                self.next_ticket_id(),
                context.total_operations(),
                payload,
                context.operation_type(),
                context.operation_context(),
                buffer,
            )
        }
    }

    /// Enforce one request on this channel.
    pub async fn enforce(&self, context: &Context, buffer: &[u8], response: &mut Response) {
        self.statistics
            .record(context.operation_context(), context.operation_size());

        let ticket = self.build_ticket(context, buffer);
        let ticket_id = ticket.ticket_id();
        response.set_ticket_id(ticket_id);

        if self.has_worker() {
            if self.queue.enqueue(ticket).await.is_error() {
                response.set_status(ResponseStatus::Error);
                return;
            }
            match self.completion.dequeue(ticket_id).await {
                Some(completed) => *response = completed,
                None => response.set_status(ResponseStatus::Error),
            }
        } else {
            self.queue.enqueue_fast_path(&ticket, response).await;
        }
    }

    /// Create and install an enforcement object keyed by the token built
    /// from its differentiation pair.
    pub async fn create_enforcement_object(
        &self,
        object_id: i64,
        pair: ObjectDifferentiationPair,
        object_type: ObjectType,
        configurations: &[i64],
    ) -> Status {
        let token = self.queue.build_object_token(&pair);

        let object = match object_type {
            ObjectType::Noop => EnforcementObject::Noop(NoopObject::new(object_id, true)),
            ObjectType::DynamicRateLimiter => {
                // Initial configuration slots: refill period, rate, an
                // optional statistics flag, and an optional refill mode
                // (2 selects the threaded bucket).
                let collect = configurations.get(2).map_or(false, |value| *value != 0);
                let mode = configurations
                    .get(3)
                    .map_or(RefillMode::Arithmetic, |value| RefillMode::from_i64(*value));
                let limiter = DynamicRateLimiter::new(
                    object_id,
                    collect,
                    mode,
                    Arc::clone(&self.shutdown),
                    self.log.clone(),
                );
                if configurations.len() >= 2 {
                    let status = limiter
                        .configure(DrlOperation::Init as i32, &configurations[..2])
                        .await;
                    if !status.is_ok() {
                        return status;
                    }
                }
                EnforcementObject::RateLimiter(limiter)
            }
        };

        let status = self.queue.create_enforcement_object(token, object).await;
        if status.is_ok() {
            if let Ok(mut tokens) = self.object_tokens.lock() {
                tokens.insert(object_id, token);
            }
        }
        status
    }

    fn token_for(&self, object_id: i64) -> Option<u32> {
        self.object_tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(&object_id).copied())
    }

    pub async fn configure_enforcement_object(
        &self,
        object_id: i64,
        operation: i32,
        values: &[i64],
    ) -> Status {
        match self.token_for(object_id) {
            Some(token) => {
                self.queue
                    .configure_enforcement_object(token, operation, values)
                    .await
            }
            None => {
                slog::error!(self.log, "unknown enforcement object"; "object_id" => object_id);
                Status::error()
            }
        }
    }

    pub async fn collect_object_statistics(
        &self,
        object_id: i64,
        raw: &mut ObjectStatisticsRaw,
    ) -> Status {
        match self.token_for(object_id) {
            Some(token) => {
                raw.channel_id = self.channel_id;
                self.queue
                    .collect_enforcement_object_statistics(token, raw)
                    .await
            }
            None => Status::not_found(),
        }
    }

    pub fn collect_general_statistics(&self, raw: &mut ChannelStatsRaw) -> Status {
        self.statistics.collect_general(self.channel_id, raw)
    }

    pub fn collect_detailed_statistics(&self, entries: &mut Vec<f64>) -> Status {
        self.statistics.collect_detailed(entries)
    }

    pub fn collect_statistic_entry(&self, operation: i32, raw: &mut ChannelStatsRaw) -> Status {
        self.statistics
            .collect_entry(self.channel_id, operation, raw)
    }

    pub async fn to_string_detailed(&self) -> String {
        format!(
            "channel {} {{ {} }}",
            self.channel_id,
            self.queue.objects_to_string().await
        )
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.queue.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    fn test_channel(id: i64) -> Channel {
        Channel::new(id, Arc::new(AtomicBool::new(false)), test_logger())
    }

    #[tokio::test]
    async fn unmatched_requests_are_bypassed_not_failed() {
        let channel = test_channel(1);
        let context = Context::new(0, 1, 1, 128, 1);
        let mut response = Response::new(0);
        channel.enforce(&context, &[], &mut response).await;
        assert_eq!(response.status(), ResponseStatus::Success);
        assert_eq!(channel.bypass_count(), 1);
    }

    #[tokio::test]
    async fn default_differentiation_routes_everything_to_one_object() {
        let channel = test_channel(1);
        let status = channel
            .create_enforcement_object(
                5,
                ObjectDifferentiationPair::new(0, 0),
                ObjectType::Noop,
                &[],
            )
            .await;
        assert!(status.is_ok());

        // Differing tags still hit the object because no classifier is
        // active by default.
        for (op_type, op_ctx) in [(1, 1), (2, 7), (9, 0)] {
            let context = Context::new(0, op_type, op_ctx, 64, 1);
            let mut response = Response::new(0);
            channel.enforce(&context, b"abc", &mut response).await;
            assert_eq!(response.status(), ResponseStatus::Success);
            assert_eq!(response.content(), b"abc");
        }
        assert_eq!(channel.bypass_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_object_id_token_is_rejected() {
        let channel = test_channel(1);
        let pair = ObjectDifferentiationPair::new(1, 1);
        assert!(channel
            .create_enforcement_object(1, pair, ObjectType::Noop, &[])
            .await
            .is_ok());
        assert!(channel
            .create_enforcement_object(2, pair, ObjectType::Noop, &[])
            .await
            .is_error());
    }

    #[tokio::test]
    async fn configure_reaches_the_object() {
        let channel = test_channel(1);
        channel
            .create_enforcement_object(
                3,
                ObjectDifferentiationPair::new(0, 0),
                ObjectType::DynamicRateLimiter,
                &[1_000_000, 5000],
            )
            .await;

        let status = channel
            .configure_enforcement_object(3, DrlOperation::Rate as i32, &[100])
            .await;
        assert!(status.is_ok());

        let status = channel
            .configure_enforcement_object(99, DrlOperation::Rate as i32, &[100])
            .await;
        assert!(status.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn object_configuration_selects_the_threaded_bucket() {
        let channel = test_channel(5);
        let status = channel
            .create_enforcement_object(
                2,
                ObjectDifferentiationPair::new(0, 0),
                ObjectType::DynamicRateLimiter,
                &[1_000_000, 50, 0, RefillMode::Threaded as i64],
            )
            .await;
        assert!(status.is_ok());

        // Drain the bucket, then overrun it; the refill task must top it
        // up and release the starved request within a few periods.
        let context = Context::new(0, 1, 1, 1, 1);
        for _ in 0..60 {
            let mut response = Response::new(0);
            let enforced = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                channel.enforce(&context, &[], &mut response),
            )
            .await;
            assert!(enforced.is_ok());
            assert_eq!(response.status(), ResponseStatus::Success);
        }
    }

    #[tokio::test]
    async fn statistics_track_operations_and_bytes() {
        let channel = test_channel(2);
        for _ in 0..3 {
            let context = Context::new(0, 1, 4, 100, 1);
            let mut response = Response::new(0);
            channel.enforce(&context, &[], &mut response).await;
        }

        let mut raw = ChannelStatsRaw::default();
        assert!(channel.collect_general_statistics(&mut raw).is_ok());
        assert_eq!(raw.channel_id, 2);
        assert_eq!(raw.total_operations, 3);
        assert_eq!(raw.total_bytes, 300);
        assert_eq!(raw.windowed_operations, 3);

        // The window resets on collection, totals do not.
        let mut raw = ChannelStatsRaw::default();
        assert!(channel.collect_general_statistics(&mut raw).is_ok());
        assert_eq!(raw.total_operations, 3);
        assert_eq!(raw.windowed_operations, 0);

        let mut raw = ChannelStatsRaw::default();
        assert!(channel.collect_statistic_entry(4, &mut raw).is_ok());
        assert_eq!(raw.total_operations, 3);
        assert!(channel.collect_statistic_entry(9, &mut raw).is_not_found());

        let mut detailed = Vec::new();
        assert!(channel.collect_detailed_statistics(&mut detailed).is_ok());
        assert_eq!(detailed.len(), 3);
    }

    #[tokio::test]
    async fn worker_mode_round_trips_through_the_queues() {
        let channel = test_channel(3);
        channel
            .create_enforcement_object(
                1,
                ObjectDifferentiationPair::new(0, 0),
                ObjectType::Noop,
                &[],
            )
            .await;
        channel.start_worker();

        let context = Context::new(0, 1, 1, 32, 1);
        let mut response = Response::new(0);
        channel.enforce(&context, b"workered", &mut response).await;
        assert_eq!(response.status(), ResponseStatus::Success);
        assert_eq!(response.content(), b"workered");

        channel.stop_worker();
    }

    #[tokio::test]
    async fn ticket_ids_are_monotonic() {
        let channel = test_channel(4);
        let context = Context::new(0, 1, 1, 8, 1);
        let mut first = Response::new(0);
        channel.enforce(&context, &[], &mut first).await;
        let mut second = Response::new(0);
        channel.enforce(&context, &[], &mut second).await;
        assert!(second.ticket_id() > first.ticket_id());
    }
}
