//! Inter-process channel abstraction.
//!
//! The real message transport (named pipes on the original platform) is an
//! external collaborator, so the client only depends on two traits:
//! [`ChannelFactory`] for the process-wide channel namespace and
//! [`ServerChannel`] for one instance's receive/reply endpoint.
//!
//! [`InMemoryChannels`] is a complete in-process implementation used by the
//! test suite and by hosts that run the data-source consumer in the same
//! process.
//!
//! # Dyn Compatibility
//!
//! Async trait methods use `Pin<Box<dyn Future>>` so endpoints can be held as
//! trait objects (`Arc<dyn ChannelFactory>`, `Box<dyn ServerChannel>`).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::ChannelError;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// =============================================================================
// Traits
// =============================================================================

/// A server-side channel endpoint owned by one client instance.
pub trait ServerChannel: Send {
    /// Receives the next incoming message.
    ///
    /// Resolves to `None` once the channel is closed.
    fn recv(&mut self) -> BoxFuture<'_, Option<String>>;

    /// Sends a response back to whoever is listening on this channel.
    fn send(&mut self, message: &str) -> BoxFuture<'_, Result<(), ChannelError>>;
}

/// Process-wide channel namespace.
///
/// Creates named server endpoints and delivers one-way messages to channels
/// owned by other parties (reply channels, the stats channel).
pub trait ChannelFactory: Send + Sync + 'static {
    /// Creates a server endpoint under the given name.
    ///
    /// # Errors
    ///
    /// Fails if the name is already taken or the transport cannot allocate
    /// the endpoint; instance creation aborts on this error.
    fn create_server(&self, name: &str) -> Result<Box<dyn ServerChannel>, ChannelError>;

    /// Delivers a message to the named channel.
    ///
    /// The response, if any, is discarded by callers in this crate.
    fn call(&self, name: &str, message: &str) -> BoxFuture<'static, Result<(), ChannelError>>;

    /// Releases a name previously claimed by `create_server`.
    fn release(&self, name: &str);
}

// =============================================================================
// In-memory implementation
// =============================================================================

struct Registered {
    request_tx: mpsc::UnboundedSender<String>,
    /// Client-side receiver for responses, handed out once via `connect`.
    response_rx: Option<mpsc::UnboundedReceiver<String>>,
}

/// In-process channel namespace backed by tokio mpsc queues.
///
/// Each named channel is a duplex pair: messages sent with
/// [`ChannelFactory::call`] or [`ClientEnd::send`] arrive at the server
/// endpoint, and server replies arrive at the [`ClientEnd`] obtained from
/// [`InMemoryChannels::connect`].
#[derive(Default)]
pub struct InMemoryChannels {
    inner: Mutex<HashMap<String, Registered>>,
}

impl InMemoryChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects the client side of a named channel.
    ///
    /// Returns `None` if no server exists under the name or the client side
    /// was already taken.
    pub fn connect(&self, name: &str) -> Option<ClientEnd> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(name)?;
        let response_rx = entry.response_rx.take()?;
        Some(ClientEnd {
            request_tx: entry.request_tx.clone(),
            response_rx,
        })
    }
}

impl ChannelFactory for InMemoryChannels {
    fn create_server(&self, name: &str) -> Result<Box<dyn ServerChannel>, ChannelError> {
        let mut inner = self.inner.lock();
        if inner.contains_key(name) {
            return Err(ChannelError::Create {
                name: name.to_string(),
                reason: "name already registered".to_string(),
            });
        }

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        inner.insert(
            name.to_string(),
            Registered {
                request_tx,
                response_rx: Some(response_rx),
            },
        );

        Ok(Box::new(MemoryServer {
            request_rx,
            response_tx,
        }))
    }

    fn call(&self, name: &str, message: &str) -> BoxFuture<'static, Result<(), ChannelError>> {
        let tx = self
            .inner
            .lock()
            .get(name)
            .map(|entry| entry.request_tx.clone());
        let name = name.to_string();
        let message = message.to_string();
        Box::pin(async move {
            let tx = tx.ok_or(ChannelError::NotFound(name))?;
            tx.send(message).map_err(|_| ChannelError::Closed)
        })
    }

    fn release(&self, name: &str) {
        self.inner.lock().remove(name);
    }
}

struct MemoryServer {
    request_rx: mpsc::UnboundedReceiver<String>,
    response_tx: mpsc::UnboundedSender<String>,
}

impl ServerChannel for MemoryServer {
    fn recv(&mut self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move { self.request_rx.recv().await })
    }

    fn send(&mut self, message: &str) -> BoxFuture<'_, Result<(), ChannelError>> {
        let result = self
            .response_tx
            .send(message.to_string())
            .map_err(|_| ChannelError::Closed);
        Box::pin(async move { result })
    }
}

/// Client side of an in-memory channel.
pub struct ClientEnd {
    request_tx: mpsc::UnboundedSender<String>,
    response_rx: mpsc::UnboundedReceiver<String>,
}

impl ClientEnd {
    /// Sends a message to the server endpoint.
    pub fn send(&self, message: &str) -> Result<(), ChannelError> {
        self.request_tx
            .send(message.to_string())
            .map_err(|_| ChannelError::Closed)
    }

    /// Receives the next server response.
    pub async fn recv(&mut self) -> Option<String> {
        self.response_rx.recv().await
    }
}
