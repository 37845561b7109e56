//! Client instance lifecycle.
//!
//! One [`ClientInstance`] owns a request queue, a channel endpoint, a cache
//! root and the two execution units (protocol gateway and request processor).
//! The instance moves through Running → Terminating → Stopped and never back:
//! the shared cancellation token is the Terminating edge, and [`shutdown`]
//! completes the Stopped edge by joining both tasks before releasing the
//! channel name.
//!
//! [`shutdown`]: ClientInstance::shutdown

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::TileCache;
use crate::channel::ChannelFactory;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::fetch::{HttpClient, TileFetcher};
use crate::gateway::ProtocolGateway;
use crate::queue::RequestQueue;
use crate::stats::StatsReporter;
use crate::worker::RequestProcessor;

/// A running tile client bound to one inter-process channel.
pub struct ClientInstance {
    instance_id: usize,
    channel_name: String,
    queue: Arc<RequestQueue>,
    stats: StatsReporter,
    cancel: CancellationToken,
    transport: Arc<dyn ChannelFactory>,
    gateway: Option<JoinHandle<()>>,
    processor: Option<JoinHandle<()>>,
}

impl ClientInstance {
    /// Creates the channel endpoint and starts both execution units.
    ///
    /// Must be called from within a tokio runtime. A channel-creation failure
    /// aborts instance creation and propagates to the registry caller.
    pub fn start(
        instance_id: usize,
        channel_name: String,
        config: &ClientConfig,
        transport: Arc<dyn ChannelFactory>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, ClientError> {
        let channel = transport.create_server(&channel_name)?;

        let cancel = CancellationToken::new();
        let stats = StatsReporter::new(
            instance_id,
            config.stats_channel.clone(),
            transport.clone(),
        );
        let queue = Arc::new(RequestQueue::new(stats.clone()));
        let cache = TileCache::new(config.cache_root.clone());
        let fetcher = TileFetcher::new(http, cache.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            fetcher,
            cache,
            queue.clone(),
            transport.clone(),
            cancel.clone(),
        ));

        let gateway = ProtocolGateway::new(channel, dispatcher.clone(), queue.clone(), cancel.clone());
        let processor =
            RequestProcessor::new(queue.clone(), dispatcher, cancel.clone(), config.retry_delay);

        info!(instance_id, channel = %channel_name, "client instance started");

        Ok(Self {
            instance_id,
            channel_name,
            queue,
            stats,
            cancel,
            transport,
            gateway: Some(tokio::spawn(gateway.run())),
            processor: Some(tokio::spawn(processor.run())),
        })
    }

    pub fn instance_id(&self) -> usize {
        self.instance_id
    }

    /// Name of the channel external callers address this instance on.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Number of requests waiting in the queue.
    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// True once termination has been requested (by message or shutdown).
    pub fn is_terminating(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops both execution units and releases the channel.
    ///
    /// Returns only after the gateway and the processor have exited; pending
    /// queue entries are dropped. A final zero pending count is reported to
    /// the stats channel.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.stats.report(0);

        if let Some(gateway) = self.gateway.take() {
            if let Err(error) = gateway.await {
                warn!(instance_id = self.instance_id, %error, "protocol gateway task failed");
            }
        }
        if let Some(processor) = self.processor.take() {
            if let Err(error) = processor.await {
                warn!(instance_id = self.instance_id, %error, "request processor task failed");
            }
        }

        self.transport.release(&self.channel_name);
        info!(instance_id = self.instance_id, "client instance stopped");
    }
}

impl std::fmt::Debug for ClientInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientInstance")
            .field("instance_id", &self.instance_id)
            .field("channel_name", &self.channel_name)
            .field("pending_requests", &self.pending_requests())
            .field("terminating", &self.is_terminating())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InMemoryChannels;
    use crate::error::FetchError;
    use crate::fetch::tests::MockHttpClient;
    use std::time::Duration;

    fn test_config(dir: &tempfile::TempDir) -> ClientConfig {
        let mut config = ClientConfig::new(dir.path());
        config.retry_delay = Duration::from_millis(10);
        config
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::TempDir::new().unwrap();
        let channels = Arc::new(InMemoryChannels::new());
        let http = Arc::new(MockHttpClient::always(Ok(b"\x89PNG".to_vec())));

        let instance = ClientInstance::start(
            0,
            "pipe0".to_string(),
            &test_config(&dir),
            channels.clone(),
            http,
        )
        .unwrap();

        assert_eq!(instance.instance_id(), 0);
        assert_eq!(instance.channel_name(), "pipe0");
        assert!(!instance.is_terminating());

        instance.shutdown().await;

        // The channel name is free again after shutdown.
        assert!(channels.create_server("pipe0").is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_channel_name_fails_creation() {
        let dir = tempfile::TempDir::new().unwrap();
        let channels = Arc::new(InMemoryChannels::new());
        let http = Arc::new(MockHttpClient::always(Err(FetchError::Http(
            "down".to_string(),
        ))));

        let _first = ClientInstance::start(
            0,
            "pipe0".to_string(),
            &test_config(&dir),
            channels.clone(),
            http.clone(),
        )
        .unwrap();

        let second = ClientInstance::start(
            1,
            "pipe0".to_string(),
            &test_config(&dir),
            channels,
            http,
        );
        assert!(matches!(second, Err(ClientError::Channel(_))));
    }

    #[tokio::test]
    async fn test_multibyte_message_does_not_kill_gateway() {
        let dir = tempfile::TempDir::new().unwrap();
        let channels = Arc::new(InMemoryChannels::new());
        let http = Arc::new(MockHttpClient::always(Ok(b"\x89PNG".to_vec())));

        let instance = ClientInstance::start(
            0,
            "pipe0".to_string(),
            &test_config(&dir),
            channels.clone(),
            http,
        )
        .unwrap();

        let mut client = channels.connect("pipe0").unwrap();

        // A message led by a wide character is dropped; the gateway must
        // survive it and keep serving the channel.
        client.send("\u{e9}getimage|R1|h|/p|l|s|png|256|0|0|1|1").unwrap();
        client.send("terminate").unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(1), client.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "OK");

        instance.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminate_message_stops_both_units() {
        let dir = tempfile::TempDir::new().unwrap();
        let channels = Arc::new(InMemoryChannels::new());
        let http = Arc::new(MockHttpClient::always(Ok(b"\x89PNG".to_vec())));

        let instance = ClientInstance::start(
            0,
            "pipe0".to_string(),
            &test_config(&dir),
            channels.clone(),
            http,
        )
        .unwrap();

        let mut client = channels.connect("pipe0").unwrap();
        client.send("terminate").unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(1), client.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "OK");

        // Shutdown joins promptly because the token is already cancelled.
        tokio::time::timeout(Duration::from_secs(1), instance.shutdown())
            .await
            .expect("shutdown did not complete");
    }
}
