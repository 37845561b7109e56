//! Pending-request reporting to the monitoring channel.
//!
//! Every queue mutation publishes `"<instanceId>,<pendingCount>"` to a
//! well-known stats channel. Delivery is fire-and-forget: the send runs on a
//! detached task and a failure is logged at debug level, never retried and
//! never fatal.

use std::sync::Arc;

use tracing::debug;

use crate::channel::ChannelFactory;

/// Fire-and-forget reporter for one client instance.
#[derive(Clone)]
pub struct StatsReporter {
    instance_id: usize,
    channel: String,
    transport: Arc<dyn ChannelFactory>,
}

impl StatsReporter {
    pub fn new(instance_id: usize, channel: String, transport: Arc<dyn ChannelFactory>) -> Self {
        Self {
            instance_id,
            channel,
            transport,
        }
    }

    /// Publishes the current pending-request count.
    ///
    /// Must be called from within a tokio runtime; the send itself happens on
    /// a spawned task so queue mutations never block on the monitor.
    pub fn report(&self, pending: usize) {
        let message = format!("{},{}", self.instance_id, pending);
        let future = self.transport.call(&self.channel, &message);
        let channel = self.channel.clone();
        tokio::spawn(async move {
            if let Err(error) = future.await {
                debug!(channel = %channel, %error, "stats delivery failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InMemoryChannels;

    #[tokio::test]
    async fn test_report_message_format() {
        let channels = Arc::new(InMemoryChannels::new());
        let mut stats_server = channels.create_server("stats").unwrap();

        let reporter = StatsReporter::new(7, "stats".to_string(), channels.clone());
        reporter.report(3);

        assert_eq!(stats_server.recv().await.unwrap(), "7,3");
    }

    #[tokio::test]
    async fn test_report_without_listener_is_silent() {
        let channels = Arc::new(InMemoryChannels::new());
        let reporter = StatsReporter::new(0, "stats".to_string(), channels);

        // No stats channel registered; the failure is swallowed.
        reporter.report(1);
        tokio::task::yield_now().await;
    }
}
