//! Request processor: the queue-draining execution unit.
//!
//! A single loop per instance waits until the queue is non-empty or the
//! cancellation token fires, then executes the highest-priority request in
//! fire-and-forget mode. Fetches run synchronously inside the loop, so one
//! fetch is in flight per instance at a time.
//!
//! A transient failure re-enqueues the same request at the lowest priority
//! after a fixed delay. There is no attempt cap: a persistently busy server
//! keeps the request cycling at retry priority for the life of the instance.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, ExecOutcome};
use crate::protocol::RETRY_PRIORITY;
use crate::queue::RequestQueue;

/// Default backoff before a failed request is retried.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Single-task loop executing queued requests for one client instance.
pub struct RequestProcessor {
    queue: Arc<RequestQueue>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    retry_delay: Duration,
}

impl RequestProcessor {
    pub fn new(
        queue: Arc<RequestQueue>,
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
        retry_delay: Duration,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            cancel,
            retry_delay,
        }
    }

    /// Runs until the instance is cancelled.
    pub async fn run(self) {
        info!("request processor started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let Some(text) = self.queue.try_pop() else {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = self.queue.wait_for_request() => {}
                }
                continue;
            };

            match self.dispatcher.execute_queued(&text).await {
                ExecOutcome::Done => {}
                ExecOutcome::Cancelled => break,
                ExecOutcome::Retry => {
                    if !self.backoff_and_requeue(text).await {
                        break;
                    }
                }
            }
        }

        info!("request processor stopped");
    }

    /// Sleeps the retry delay, then re-enqueues the request at the lowest
    /// priority. Returns false when cancelled during the backoff; the request
    /// is dropped in that case since the instance is going away.
    async fn backoff_and_requeue(&self, text: String) -> bool {
        // Server is likely busy; slow down before asking again.
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(self.retry_delay) => {}
        }
        debug!("re-enqueueing failed request at retry priority");
        self.queue.push(RETRY_PRIORITY, text);
        true
    }
}
