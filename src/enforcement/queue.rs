//! Submission and completion queues.
//!
//! The submission queue owns a channel's enforcement objects and applies
//! them to tickets. By default callers take the fast path and enforce on
//! their own task; when a channel runs a background worker, tickets are
//! queued FIFO, the worker enforces them, and responses flow back through
//! the completion queue where each caller waits for its own ticket id.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::differentiation::{ObjectDifferentiationBuilder, ObjectDifferentiationPair};
use crate::enforcement::object::{EnforcementObject, NoopObject};
use crate::enforcement::response::Response;
use crate::enforcement::tb_stats::ObjectStatisticsRaw;
use crate::enforcement::ticket::Ticket;
use crate::options;
use crate::status::Status;

/// Holds enforced responses until their submitters claim them by ticket id.
#[derive(Debug)]
pub struct CompletionQueue {
    queue: std::sync::Mutex<VecDeque<Response>>,
    available: Notify,
    running: AtomicBool,
    log: slog::Logger,
}

impl CompletionQueue {
    pub fn new(log: slog::Logger) -> CompletionQueue {
        CompletionQueue {
            queue: std::sync::Mutex::new(VecDeque::new()),
            available: Notify::new(),
            running: AtomicBool::new(true),
            log,
        }
    }

    pub fn size(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn enqueue(&self, response: Response) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(response);
        }
        self.available.notify_waiters();
    }

    /// Wait for the response carrying `ticket_id`.
    ///
    /// Responses may complete out of submission order; a waiter that does
    /// not find its ticket re-waits on a bounded timeout so it can observe
    /// shutdown, and logs at debug level every few retries. Returns `None`
    /// only when the queue stops running.
    pub async fn dequeue(&self, ticket_id: u64) -> Option<Response> {
        let mut retries: u32 = 0;
        loop {
            let notified = self.available.notified();
            if let Ok(mut queue) = self.queue.lock() {
                if let Some(index) = queue.iter().position(|r| r.ticket_id() == ticket_id) {
                    return queue.remove(index);
                }
            }
            if !self.running.load(Ordering::Acquire) {
                return None;
            }
            retries += 1;
            if retries % options::DEQUEUE_RETRY_LOG_INTERVAL == 0 {
                slog::debug!(
                    self.log,
                    "still waiting for completion";
                    "ticket_id" => ticket_id,
                    "retries" => retries
                );
            }
            let _ = tokio::time::timeout(options::DEQUEUE_TIMEOUT, notified).await;
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.available.notify_waiters();
    }
}

/// Owns a channel's enforcement objects and routes tickets to them.
#[derive(Debug)]
pub struct SubmissionQueue {
    objects: tokio::sync::Mutex<Vec<(u32, EnforcementObject)>>,
    diff_builder: std::sync::Mutex<ObjectDifferentiationBuilder>,
    no_match_object: NoopObject,
    completion: Arc<CompletionQueue>,
    submit_tx: std::sync::Mutex<Option<mpsc::Sender<Ticket>>>,
    running: Arc<AtomicBool>,
    log: slog::Logger,
}

impl SubmissionQueue {
    pub fn new(completion: Arc<CompletionQueue>, log: slog::Logger) -> SubmissionQueue {
        let mut diff_builder = ObjectDifferentiationBuilder::default();
        diff_builder.bind_builder();
        SubmissionQueue {
            objects: tokio::sync::Mutex::new(Vec::new()),
            diff_builder: std::sync::Mutex::new(diff_builder),
            no_match_object: NoopObject::new(-1, true),
            completion,
            submit_tx: std::sync::Mutex::new(None),
            running: Arc::new(AtomicBool::new(true)),
            log,
        }
    }

    /// Select which classifiers differentiate objects within this channel.
    pub fn define_object_differentiation(&self, operation_type: bool, operation_context: bool) {
        if let Ok(mut builder) = self.diff_builder.lock() {
            builder.set_classifiers(operation_type, operation_context);
            builder.bind_builder();
        }
    }

    pub fn build_object_token(&self, pair: &ObjectDifferentiationPair) -> u32 {
        match self.diff_builder.lock() {
            Ok(builder) => builder.build_token(pair),
            Err(poisoned) => poisoned.into_inner().build_token(pair),
        }
    }

    /// Requests bypassed because no object token matched.
    pub fn no_match_count(&self) -> u64 {
        self.no_match_object.counter()
    }

    /// Fast path: enforce on the caller's task, no queueing.
    pub async fn enqueue_fast_path(&self, ticket: &Ticket, response: &mut Response) {
        self.enforce_mechanism(ticket, response).await;
    }

    /// Queued path: hand the ticket to the channel worker.
    pub async fn enqueue(&self, ticket: Ticket) -> Status {
        let sender = match self.submit_tx.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        match sender {
            Some(sender) => match sender.send(ticket).await {
                Ok(()) => Status::ok(),
                Err(error) => {
                    slog::error!(self.log, "failed to submit ticket"; "error" => error.to_string());
                    Status::error()
                }
            },
            None => Status::error(),
        }
    }

    // Route the ticket to its enforcement object. The object list lock is
    // held across the enforcement so a channel's requests stay ordered.
    async fn enforce_mechanism(&self, ticket: &Ticket, response: &mut Response) {
        let token = self.build_object_token(&ObjectDifferentiationPair::new(
            ticket.operation_type() as u32,
            ticket.operation_context() as u32,
        ));

        let objects = self.objects.lock().await;
        match objects.iter().find(|(object_token, _)| *object_token == token) {
            Some((_, object)) => object.enforce(ticket, response).await,
            None => self.no_match_object.enforce(ticket, response),
        }
    }

    /// Install a new enforcement object under `token`. Duplicate tokens
    /// are rejected.
    pub async fn create_enforcement_object(
        &self,
        token: u32,
        object: EnforcementObject,
    ) -> Status {
        let mut objects = self.objects.lock().await;
        if objects.iter().any(|(existing, _)| *existing == token) {
            slog::error!(
                self.log,
                "enforcement object token already exists";
                "token" => token,
                "object_id" => object.id()
            );
            return Status::error();
        }
        objects.push((token, object));
        slog::debug!(self.log, "created enforcement object"; "count" => objects.len());
        Status::ok()
    }

    pub async fn configure_enforcement_object(
        &self,
        token: u32,
        operation: i32,
        values: &[i64],
    ) -> Status {
        let objects = self.objects.lock().await;
        match objects.iter().find(|(object_token, _)| *object_token == token) {
            Some((_, object)) => object.configure(operation, values).await,
            None => Status::error(),
        }
    }

    pub async fn collect_enforcement_object_statistics(
        &self,
        token: u32,
        raw: &mut ObjectStatisticsRaw,
    ) -> Status {
        let objects = self.objects.lock().await;
        match objects.iter().find(|(object_token, _)| *object_token == token) {
            Some((_, object)) => object.collect_statistics(raw).await,
            None => Status::not_found(),
        }
    }

    /// Spawn the background worker that drains the submission queue into
    /// the completion queue. At most one worker per channel.
    pub fn start_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let (sender, mut receiver) = mpsc::channel::<Ticket>(64);
        if let Ok(mut guard) = self.submit_tx.lock() {
            *guard = Some(sender);
        }

        let queue = Arc::clone(self);
        tokio::task::spawn(async move {
            let mut timer = tokio::time::interval(options::DEQUEUE_TIMEOUT);
            loop {
                tokio::select! {
                    ticket = receiver.recv() => {
                        match ticket {
                            Some(ticket) => {
                                let mut response = Response::new(ticket.ticket_id());
                                queue.enforce_mechanism(&ticket, &mut response).await;
                                queue.completion.enqueue(response);
                            }
                            None => break,
                        }
                    }
                    _ = timer.tick() => {
                        if !queue.running.load(Ordering::Acquire) {
                            slog::debug!(queue.log, "worker observed stop request");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Ask the worker (and any completion waiters) to stop at the next
    /// timeout boundary.
    pub fn stop_worker(&self) {
        self.running.store(false, Ordering::Release);
        if let Ok(mut guard) = self.submit_tx.lock() {
            guard.take();
        }
        self.completion.stop();
        slog::debug!(self.log, "submission queue stopped");
    }

    pub async fn objects_to_string(&self) -> String {
        let objects = self.objects.lock().await;
        let mut out = String::from("enforcement objects: ");
        for (token, object) in objects.iter() {
            out.push_str(&format!("{{ {}; {} }} ", token, object));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::response::ResponseStatus;
    use slog::o;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    fn queue_pair() -> (Arc<SubmissionQueue>, Arc<CompletionQueue>) {
        let completion = Arc::new(CompletionQueue::new(test_logger()));
        let submission = Arc::new(SubmissionQueue::new(
            Arc::clone(&completion),
            test_logger(),
        ));
        (submission, completion)
    }

    #[tokio::test]
    async fn fast_path_bypasses_unmatched_requests() {
        let (submission, _completion) = queue_pair();
        let ticket = Ticket::new(1, 1, 1, 0, 0);
        let mut response = Response::new(1);
        submission.enqueue_fast_path(&ticket, &mut response).await;
        assert_eq!(response.status(), ResponseStatus::Success);
        assert_eq!(submission.no_match_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_object_token_is_rejected() {
        let (submission, _completion) = queue_pair();
        let first = EnforcementObject::Noop(NoopObject::new(1, false));
        let second = EnforcementObject::Noop(NoopObject::new(2, false));
        assert!(submission.create_enforcement_object(7, first).await.is_ok());
        assert!(submission
            .create_enforcement_object(7, second)
            .await
            .is_error());
    }

    #[tokio::test]
    async fn configure_unknown_token_is_an_error() {
        let (submission, _completion) = queue_pair();
        assert!(submission
            .configure_enforcement_object(9, 1, &[1, 2])
            .await
            .is_error());
    }

    #[tokio::test]
    async fn completion_queue_matches_by_ticket_id() {
        let completion = Arc::new(CompletionQueue::new(test_logger()));

        // Results arrive out of submission order: 2, 1, 3.
        for id in [2u64, 1, 3] {
            let mut response = Response::new(id);
            response.set_status(ResponseStatus::Success);
            completion.enqueue(response);
        }

        let response = completion.dequeue(1).await.expect("response for ticket 1");
        assert_eq!(response.ticket_id(), 1);

        let response = completion.dequeue(2).await.expect("response for ticket 2");
        assert_eq!(response.ticket_id(), 2);
        let response = completion.dequeue(3).await.expect("response for ticket 3");
        assert_eq!(response.ticket_id(), 3);
        assert_eq!(completion.size(), 0);
    }

    #[tokio::test]
    async fn waiter_blocks_until_its_ticket_arrives() {
        let completion = Arc::new(CompletionQueue::new(test_logger()));

        let waiter = {
            let completion = Arc::clone(&completion);
            tokio::spawn(async move { completion.dequeue(42).await })
        };

        // Let the waiter observe an empty queue, then feed an unrelated
        // response and finally the one it wants.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        completion.enqueue(Response::new(7));
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        completion.enqueue(Response::new(42));

        let response = waiter.await.expect("join waiter").expect("response");
        assert_eq!(response.ticket_id(), 42);
        assert_eq!(completion.size(), 1);
    }

    #[tokio::test]
    async fn stopped_queue_releases_waiters() {
        let completion = Arc::new(CompletionQueue::new(test_logger()));
        let waiter = {
            let completion = Arc::clone(&completion);
            tokio::spawn(async move { completion.dequeue(99).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        completion.stop();
        let result = waiter.await.expect("join waiter");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn worker_path_round_trips_tickets() {
        let (submission, completion) = queue_pair();
        let object = EnforcementObject::Noop(NoopObject::new(1, false));
        let token = submission.build_object_token(&ObjectDifferentiationPair::new(0, 0));
        submission.create_enforcement_object(token, object).await;

        let worker = submission.start_worker();

        for id in 1..=10u64 {
            let status = submission
                .enqueue(Ticket::with_buffer(id, 1, 1, 0, 0, b"queued"))
                .await;
            assert!(status.is_ok());
        }
        // Claim completions in reverse to exercise out-of-order matching.
        for id in (1..=10u64).rev() {
            let response = completion.dequeue(id).await.expect("response");
            assert_eq!(response.ticket_id(), id);
            assert_eq!(response.status(), ResponseStatus::Success);
            assert_eq!(response.content(), b"queued");
        }

        submission.stop_worker();
        worker.await.expect("join worker");
    }

    #[tokio::test]
    async fn enqueue_without_worker_is_an_error() {
        let (submission, _completion) = queue_pair();
        let status = submission.enqueue(Ticket::new(1, 1, 1, 0, 0)).await;
        assert!(status.is_error());
    }
}
