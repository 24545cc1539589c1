//! Delivery of formatted messages.

use tracing::{debug, instrument};

use crate::{
    base::types::{DispatchStrategy, OutboundMessage, Route, Void},
    service::{bus::BusPublisher, chat::ChatClient},
};

/// Delivers a formatted message, either straight to chat or onto an outbound topic.
///
/// Either way, `dispatch` only returns `Ok` once the far side has confirmed the message.
#[derive(Clone)]
pub enum Dispatcher {
    Direct(ChatClient),
    Republish(BusPublisher),
}

impl Dispatcher {
    pub fn strategy(&self) -> DispatchStrategy {
        match self {
            Dispatcher::Direct(_) => DispatchStrategy::Direct,
            Dispatcher::Republish(_) => DispatchStrategy::Republish,
        }
    }

    /// Dispatch a message.
    ///
    /// Direct sends go to `route`; republished messages carry only the body and
    /// the channel tag, leaving routing to the next hop.
    #[instrument(skip_all, fields(strategy = ?self.strategy()))]
    pub async fn dispatch(&self, route: &Route, message: &OutboundMessage) -> Void {
        match self {
            Dispatcher::Direct(chat) => {
                chat.send_message(route, &message.body).await?;
                debug!("Sent message to {}", route);
            }
            Dispatcher::Republish(publisher) => {
                let id = publisher.publish(message).await?;
                debug!("Republished message as {}", id);
            }
        }

        Ok(())
    }
}
