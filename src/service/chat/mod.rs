pub mod keybase;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{Route, Void};

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// Implementations hold a session that was authenticated when the client was
/// created, and must be safe to call from many pipeline tasks at once.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Send a message to a team.
    ///
    /// When the route has no channel, the chat system picks the team's default channel.
    async fn send_message(&self, route: &Route, body: &str) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}
