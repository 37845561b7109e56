//! Command dispatch for both execution units.
//!
//! The same dispatcher serves two modes:
//!
//! - **Cache-check mode** (protocol gateway): answers immediately from the
//!   disk cache or acknowledges with `<download>` and defers the fetch to the
//!   request queue. `findinfo` and `getcapabilities` always run synchronously
//!   here; only `getimage` consults the cache.
//! - **Fire-and-forget mode** (request processor): performs the full network
//!   fetch and delivers the result on the caller-supplied reply channel.
//!
//! Retries are silent: a transient failure produces no per-attempt error
//! message, only a demoted re-enqueue by the processor.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{TileCache, TileKey};
use crate::channel::ChannelFactory;
use crate::error::ParseError;
use crate::fetch::{FetchOutcome, TileFetcher};
use crate::protocol::{parse_command, Command, ImageRequest, Response};
use crate::queue::RequestQueue;

/// Outcome of executing one queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Finished; nothing further to do.
    Done,
    /// Transient failure; re-enqueue after the backoff delay.
    Retry,
    /// Shutdown interrupted execution; drop the request.
    Cancelled,
}

/// Shared command execution for the gateway and the processor.
pub struct Dispatcher {
    fetcher: TileFetcher,
    cache: TileCache,
    queue: Arc<RequestQueue>,
    transport: Arc<dyn ChannelFactory>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        fetcher: TileFetcher,
        cache: TileCache,
        queue: Arc<RequestQueue>,
        transport: Arc<dyn ChannelFactory>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            cache,
            queue,
            transport,
            cancel,
        }
    }

    /// Handles a request in cache-check mode.
    ///
    /// Returns the response to send on the instance channel, or `None` when
    /// the reply already went out on the request's reply channel (or the
    /// request was dropped as malformed).
    pub async fn check_request(&self, priority: u8, text: &str) -> Option<Response> {
        match parse_command(text) {
            Ok(Command::Image(request)) => {
                let key = TileKey::from_request(&request);
                if self.cache.probe(&key) {
                    let path = key.image_path(self.cache.root());
                    self.deliver(&request.reply_channel, &file_response(&request, &path))
                        .await;
                } else {
                    self.deliver(
                        &request.reply_channel,
                        &Response::Download {
                            lon: request.lon,
                            lat: request.lat,
                            lod: request.lod,
                        },
                    )
                    .await;
                    // Defer the download at the caller's original priority.
                    self.queue.push(priority, text);
                }
                None
            }
            Ok(Command::FindInfo(request)) => {
                match self.fetcher.find_info(&request, &self.cancel).await {
                    Some((lat, lon)) => Some(Response::Found { lat, lon }),
                    None => Some(Response::NoData),
                }
            }
            Ok(Command::Capabilities(request)) => {
                if self.fetcher.get_capabilities(&request, &self.cancel).await {
                    Some(Response::Complete)
                } else {
                    Some(Response::NoData)
                }
            }
            // Control commands are handled by the gateway before dispatch.
            Ok(Command::Terminate) | Ok(Command::RemoveRequests { .. }) => None,
            Err(ParseError::UnknownCommand(name)) => {
                debug!(command = %name, "unknown command");
                Some(Response::UnknownCommand)
            }
            Err(error) => {
                debug!(%error, "dropping malformed request");
                None
            }
        }
    }

    /// Executes a dequeued request in fire-and-forget mode.
    pub async fn execute_queued(&self, text: &str) -> ExecOutcome {
        match parse_command(text) {
            Ok(Command::Image(request)) => self.execute_image(&request).await,
            // Only image requests are ever queued; anything else is dropped.
            Ok(command) => {
                debug!(?command, "dropping non-image queued request");
                ExecOutcome::Done
            }
            Err(error) => {
                debug!(%error, "dropping unparseable queued request");
                ExecOutcome::Done
            }
        }
    }

    async fn execute_image(&self, request: &ImageRequest) -> ExecOutcome {
        let key = TileKey::from_request(request);

        // Another path may have filled the entry while this request waited.
        if self.cache.probe(&key) {
            let path = key.image_path(self.cache.root());
            self.deliver(&request.reply_channel, &file_response(request, &path))
                .await;
            return ExecOutcome::Done;
        }

        match self.fetcher.fetch(request, &self.cancel).await {
            FetchOutcome::Success(path) => {
                if !self.cancel.is_cancelled() {
                    self.deliver(&request.reply_channel, &file_response(request, &path))
                        .await;
                }
                ExecOutcome::Done
            }
            FetchOutcome::Transient => ExecOutcome::Retry,
            FetchOutcome::Cancelled => ExecOutcome::Cancelled,
        }
    }

    async fn deliver(&self, channel: &str, response: &Response) {
        if let Err(error) = self.transport.call(channel, &response.to_string()).await {
            warn!(channel = %channel, %error, "failed to deliver response");
        }
    }
}

fn file_response(request: &ImageRequest, path: &std::path::Path) -> Response {
    Response::File {
        lon: request.lon,
        lat: request.lat,
        lod: request.lod,
        path: path.display().to_string(),
    }
}
