//! Client instance configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::DEFAULT_HTTP_TIMEOUT;
use crate::worker::DEFAULT_RETRY_DELAY;

/// Base name for instance channels; the instance index is appended.
pub const DEFAULT_CHANNEL_PREFIX: &str = "WebDataSourceServerPipe";

/// Well-known channel name for pending-count monitoring.
pub const DEFAULT_STATS_CHANNEL: &str = "WebDataSourceStatsPipe";

/// Configuration shared by every instance a registry creates.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root directory of the disk tile cache.
    pub cache_root: PathBuf,

    /// Prefix for per-instance channel names.
    pub channel_prefix: String,

    /// Name of the monitoring channel for queue statistics.
    pub stats_channel: String,

    /// Backoff before a transiently failed request is retried.
    pub retry_delay: Duration,

    /// Request timeout for the built-in HTTP client.
    pub http_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration with the given cache root and defaults for
    /// everything else.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            stats_channel: DEFAULT_STATS_CHANNEL.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("webtile-cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("/tmp/tiles");
        assert_eq!(config.cache_root, PathBuf::from("/tmp/tiles"));
        assert_eq!(config.channel_prefix, "WebDataSourceServerPipe");
        assert_eq!(config.stats_channel, "WebDataSourceStatsPipe");
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }
}
