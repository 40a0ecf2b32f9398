//! The enforcement path: tickets, responses, objects, queues, channels.

pub mod channel;
pub mod object;
pub mod queue;
pub mod rate_limiter;
pub mod response;
pub mod tb_stats;
pub mod ticket;

pub use channel::{Channel, ChannelStatsRaw};
pub use object::{EnforcementObject, NoopObject, ObjectType};
pub use queue::{CompletionQueue, SubmissionQueue};
pub use rate_limiter::{DrlOperation, DynamicRateLimiter, RefillMode, TokenBucket};
pub use response::{Response, ResponseStatus};
pub use tb_stats::{ObjectStatisticsRaw, TbStats, TbStatsEntry};
pub use ticket::Ticket;
