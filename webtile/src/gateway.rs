//! Protocol gateway: the channel-facing execution unit.
//!
//! Blocks on the instance channel for incoming textual messages and handles
//! them inline:
//!
//! - `terminate` (substring) sets the shared cancellation token, replies
//!   `OK` and exits the loop.
//! - `removerequests` (substring) replies `OK` and then atomically drops the
//!   matching queued entries.
//! - Everything else is a prioritized request dispatched in cache-check mode.
//!
//! The loop races channel receive against the cancellation token so registry
//! destruction stops the gateway even when no message arrives.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ServerChannel;
use crate::dispatch::Dispatcher;
use crate::protocol::{classify_control, split_priority, Command, Response};
use crate::queue::RequestQueue;

/// Single-task loop receiving commands for one client instance.
pub struct ProtocolGateway {
    channel: Box<dyn ServerChannel>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<RequestQueue>,
    cancel: CancellationToken,
}

impl ProtocolGateway {
    pub fn new(
        channel: Box<dyn ServerChannel>,
        dispatcher: Arc<Dispatcher>,
        queue: Arc<RequestQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            dispatcher,
            queue,
            cancel,
        }
    }

    /// Runs until a terminate message arrives, the channel closes, or the
    /// instance is cancelled.
    pub async fn run(mut self) {
        info!("protocol gateway started");

        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = self.channel.recv() => match received {
                    Some(message) => message,
                    None => {
                        debug!("instance channel closed");
                        break;
                    }
                },
            };

            if message.is_empty() {
                continue;
            }

            match classify_control(&message) {
                Some(Command::Terminate) => {
                    self.reply(&Response::Ok).await;
                    self.cancel.cancel();
                    break;
                }
                Some(Command::RemoveRequests { requester }) => {
                    self.reply(&Response::Ok).await;
                    if let Some(requester) = requester {
                        let removed = self.queue.remove_matching(&requester);
                        debug!(requester = %requester, removed, "removed pending requests");
                    }
                }
                _ => {
                    let Some((priority, body)) = split_priority(&message) else {
                        continue;
                    };
                    if let Some(response) = self.dispatcher.check_request(priority, body).await {
                        self.reply(&response).await;
                    }
                }
            }
        }

        info!("protocol gateway stopped");
    }

    async fn reply(&mut self, response: &Response) {
        if let Err(error) = self.channel.send(&response.to_string()).await {
            warn!(%error, "failed to send gateway reply");
        }
    }
}
