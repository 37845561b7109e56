//! Registry of client instances.
//!
//! The registry owns every instance it creates and maps numeric ids to
//! channel names for external callers. Slots are nulled on destroy, never
//! removed, so an id stays valid (and dead) for the registry's lifetime and
//! at most one live instance exists per id.

use std::sync::Arc;

use tracing::info;

use crate::channel::ChannelFactory;
use crate::client::ClientInstance;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::fetch::{HttpClient, ReqwestClient};

/// Owned mapping from instance id to client instance.
pub struct InstanceRegistry {
    config: ClientConfig,
    transport: Arc<dyn ChannelFactory>,
    http: Arc<dyn HttpClient>,
    instances: Vec<Option<ClientInstance>>,
}

impl InstanceRegistry {
    /// Creates a registry using the built-in reqwest HTTP client.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn ChannelFactory>,
    ) -> Result<Self, ClientError> {
        let http = Arc::new(ReqwestClient::with_timeout(config.http_timeout)?);
        Ok(Self::with_http_client(config, transport, http))
    }

    /// Creates a registry with an injected HTTP client.
    pub fn with_http_client(
        config: ClientConfig,
        transport: Arc<dyn ChannelFactory>,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            config,
            transport,
            http,
            instances: Vec::new(),
        }
    }

    /// Creates a new client instance and returns its id.
    ///
    /// The channel name is the configured prefix followed by the instance
    /// index. Ids are never reused.
    pub fn create(&mut self) -> Result<usize, ClientError> {
        let instance_id = self.instances.len();
        let channel_name = format!("{}{}", self.config.channel_prefix, instance_id);

        let instance = ClientInstance::start(
            instance_id,
            channel_name,
            &self.config,
            self.transport.clone(),
            self.http.clone(),
        )?;

        self.instances.push(Some(instance));
        info!(instance_id, "registered client instance");
        Ok(instance_id)
    }

    /// Tears down the addressed instance.
    ///
    /// Blocks until both execution units have exited and the channel is
    /// released. The slot is nulled; the id is not reused.
    pub async fn destroy(&mut self, instance_id: usize) -> Result<(), ClientError> {
        let slot = self
            .instances
            .get_mut(instance_id)
            .ok_or(ClientError::NoSuchInstance(instance_id))?;
        let instance = slot
            .take()
            .ok_or(ClientError::NoSuchInstance(instance_id))?;

        instance.shutdown().await;
        info!(instance_id, "destroyed client instance");
        Ok(())
    }

    /// Channel name of a live instance, for external callers addressing it.
    pub fn channel_name(&self, instance_id: usize) -> Option<&str> {
        self.instances
            .get(instance_id)?
            .as_ref()
            .map(ClientInstance::channel_name)
    }

    /// Returns a live instance by id.
    pub fn get(&self, instance_id: usize) -> Option<&ClientInstance> {
        self.instances.get(instance_id)?.as_ref()
    }

    /// Number of live instances.
    pub fn live_count(&self) -> usize {
        self.instances.iter().filter(|slot| slot.is_some()).count()
    }
}
