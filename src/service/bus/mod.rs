pub mod pubsub;

use std::{fmt, ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{Envelope, OutboundMessage, Res, Void};

// Traits.

/// Generic inbound bus trait that subscription clients must implement.
///
/// The bus owns redelivery: anything pulled but never acknowledged comes back later.
#[async_trait]
pub trait GenericBusSubscriber: Send + Sync + 'static {
    /// Pull up to `max_messages` envelopes.
    ///
    /// May wait for messages to arrive and may return fewer, or none.
    async fn pull(&self, max_messages: usize) -> Res<Vec<Envelope>>;

    /// Acknowledge a single envelope so that it is never redelivered.
    async fn acknowledge(&self, ack_id: &str) -> Void;
}

/// Generic outbound bus trait that publishing clients must implement.
#[async_trait]
pub trait GenericBusPublisher: Send + Sync + 'static {
    /// Publish a message and wait until the bus has durably accepted it.
    ///
    /// Returns the bus-assigned message id.
    async fn publish(&self, message: &OutboundMessage) -> Res<String>;
}

// Errors.

/// A bus failure that retrying cannot fix, such as an unknown subscription or a missing permission.
///
/// Clients wrap these in the returned `anyhow::Error`; the receive loop stops on them.
#[derive(Debug)]
pub struct PermanentBusError(pub String);

impl fmt::Display for PermanentBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for PermanentBusError {}

/// Whether `err` (or anything in its chain) is a [`PermanentBusError`].
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<PermanentBusError>())
}

// Structs.

/// Inbound bus client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct BusSubscriber {
    inner: Arc<dyn GenericBusSubscriber>,
}

impl Deref for BusSubscriber {
    type Target = dyn GenericBusSubscriber;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl BusSubscriber {
    pub fn new(inner: Arc<dyn GenericBusSubscriber>) -> Self {
        Self { inner }
    }
}

/// Outbound bus client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct BusPublisher {
    inner: Arc<dyn GenericBusPublisher>,
}

impl Deref for BusPublisher {
    type Target = dyn GenericBusPublisher;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl BusPublisher {
    pub fn new(inner: Arc<dyn GenericBusPublisher>) -> Self {
        Self { inner }
    }
}
