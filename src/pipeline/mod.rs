//! The relay pipeline.
//!
//! Every envelope runs through the same stages:
//! - decode the payload into a typed record
//! - format the record into a message body and channel tag
//! - resolve the destination from defaults and envelope attributes
//! - dispatch, then acknowledge only if dispatch succeeded
//!
//! A `Pipeline` holds nothing mutable, so the subscription loop runs many
//! envelopes through one shared instance concurrently.

pub mod decode;
pub mod dispatch;
pub mod format;
pub mod route;
pub mod subscription;

use tracing::{debug, error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{DecodeFailurePolicy, Disposition, Envelope, EventKind, Route},
    },
    service::bus::BusSubscriber,
};

use dispatch::Dispatcher;

pub struct Pipeline {
    kind: EventKind,
    default_route: Route,
    decode_failure: DecodeFailurePolicy,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(kind: EventKind, default_route: Route, decode_failure: DecodeFailurePolicy, dispatcher: Dispatcher) -> Self {
        Self {
            kind,
            default_route,
            decode_failure,
            dispatcher,
        }
    }

    /// Build a pipeline from the loaded configuration.
    pub fn from_config(config: &Config, dispatcher: Dispatcher) -> Self {
        Self::new(config.event_kind, config.default_route(), config.decode_failure_policy(), dispatcher)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn decode_failure(&self) -> DecodeFailurePolicy {
        self.decode_failure
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run one envelope through decode, format, route and dispatch.
    ///
    /// Never acknowledges anything itself; the returned disposition says whether the caller should.
    #[instrument(skip_all, fields(message_id = %envelope.message_id))]
    pub async fn handle(&self, envelope: &Envelope) -> Disposition {
        let record = match decode::decode(self.kind, &envelope.payload) {
            Ok(record) => record,
            Err(err) => {
                error!("Failed to decode {:?} payload (decode_failure = {}): {:#}", self.kind, self.decode_failure, err);

                return match self.decode_failure {
                    DecodeFailurePolicy::Ack => Disposition::Acknowledge,
                    DecodeFailurePolicy::Leave => Disposition::Leave,
                };
            }
        };

        let message = format::format(&record);
        let route = route::resolve(&self.default_route, &envelope.attributes);

        info!("Dispatching message '{}' (route: {}, tag: {:?})", message.body, route, message.channel_tag);

        match self.dispatcher.dispatch(&route, &message).await {
            Ok(()) => Disposition::Acknowledge,
            Err(err) => {
                error!("Failed to dispatch message, leaving it for redelivery: {:#}", err);
                Disposition::Leave
            }
        }
    }

    /// Handle an envelope and acknowledge it on the bus when the pipeline succeeded.
    pub async fn process(&self, envelope: &Envelope, subscriber: &BusSubscriber) -> Disposition {
        let disposition = self.handle(envelope).await;

        match disposition {
            Disposition::Acknowledge => {
                if let Err(err) = subscriber.acknowledge(&envelope.ack_id).await {
                    warn!("Failed to acknowledge {}, it will be redelivered: {:#}", envelope.message_id, err);
                }
            }
            Disposition::Leave => debug!("Leaving {} unacknowledged", envelope.message_id),
        }

        disposition
    }
}
