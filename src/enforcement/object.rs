//! Enforcement objects: the per-request mechanisms a channel applies.
//!
//! Objects are a closed set dispatched as a tagged enum so the channel's
//! container stays homogeneous and calls inline. New mechanisms
//! (encryption, caching) extend the enum.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::enforcement::rate_limiter::DynamicRateLimiter;
use crate::enforcement::response::{Response, ResponseStatus};
use crate::enforcement::tb_stats::ObjectStatisticsRaw;
use crate::enforcement::ticket::Ticket;
use crate::status::Status;

/// Wire/rules identifier of an enforcement object variant. `Noop` is also
/// the conversion fallback for unknown tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Noop = 1,
    DynamicRateLimiter = 2,
}

impl ObjectType {
    pub fn from_token(token: &str) -> ObjectType {
        match token {
            "drl" | "dynamic_rate_limiter" => ObjectType::DynamicRateLimiter,
            _ => ObjectType::Noop,
        }
    }

    pub fn from_i32(value: i32) -> ObjectType {
        match value {
            2 => ObjectType::DynamicRateLimiter,
            _ => ObjectType::Noop,
        }
    }
}

/// Pass-through object. Counts enforcements and copies content, nothing
/// else; it also backs the channel's no-match bypass.
#[derive(Debug)]
pub struct NoopObject {
    object_id: i64,
    shared: bool,
    counter: AtomicU64,
}

impl NoopObject {
    pub fn new(object_id: i64, shared: bool) -> NoopObject {
        NoopObject {
            object_id,
            shared,
            counter: AtomicU64::new(0),
        }
    }

    pub fn object_id(&self) -> i64 {
        self.object_id
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    fn increment_counter(&self) {
        if self.shared {
            self.counter.fetch_add(1, Ordering::AcqRel);
        } else {
            // Single-owner objects get the cheaper ordering.
            self.counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn enforce(&self, ticket: &Ticket, response: &mut Response) {
        self.increment_counter();

        let has_content = ticket.buffer_size() > 0;
        response.set_status(ResponseStatus::Success);
        response.set_has_content(has_content);
        if has_content {
            response.set_content(ticket.buffer());
        }
    }

    pub fn configure(&self, _operation: i32, _values: &[i64]) -> Status {
        Status::ok()
    }

    pub fn collect_statistics(&self, _raw: &mut ObjectStatisticsRaw) -> Status {
        // Nothing to report beyond the counter.
        Status::error()
    }
}

impl std::fmt::Display for NoopObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "noop object ({}, {})", self.object_id, self.counter())
    }
}

/// A single enforcement mechanism installed in a channel.
#[derive(Debug)]
pub enum EnforcementObject {
    Noop(NoopObject),
    RateLimiter(DynamicRateLimiter),
}

impl EnforcementObject {
    pub fn id(&self) -> i64 {
        match self {
            EnforcementObject::Noop(object) => object.object_id(),
            EnforcementObject::RateLimiter(object) => object.object_id(),
        }
    }

    /// Apply the mechanism to one ticket. Never fails; fatal conditions
    /// surface as `ResponseStatus::Error` on the response.
    pub async fn enforce(&self, ticket: &Ticket, response: &mut Response) {
        match self {
            EnforcementObject::Noop(object) => object.enforce(ticket, response),
            EnforcementObject::RateLimiter(object) => object.enforce(ticket, response).await,
        }
    }

    pub async fn configure(&self, operation: i32, values: &[i64]) -> Status {
        match self {
            EnforcementObject::Noop(object) => object.configure(operation, values),
            EnforcementObject::RateLimiter(object) => object.configure(operation, values).await,
        }
    }

    pub async fn collect_statistics(&self, raw: &mut ObjectStatisticsRaw) -> Status {
        match self {
            EnforcementObject::Noop(object) => object.collect_statistics(raw),
            EnforcementObject::RateLimiter(object) => object.collect_statistics(raw).await,
        }
    }
}

impl std::fmt::Display for EnforcementObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnforcementObject::Noop(object) => object.fmt(f),
            EnforcementObject::RateLimiter(object) => object.fmt(f),
        }
    }
}
