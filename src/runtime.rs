//! Runtime services and shared state for the relay.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::{
    base::{
        config::Config,
        types::{DispatchStrategy, Res, Void},
    },
    pipeline::{Pipeline, dispatch::Dispatcher, subscription},
    service::{
        bus::{BusPublisher, BusSubscriber, pubsub::PubSubClient},
        chat::ChatClient,
    },
};

/// Runtime service context.
///
/// Holds the long-lived client handles, created once at startup and shared by
/// every pipeline run. It is designed to be trivially cloneable.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The inbound bus client.
    pub subscriber: BusSubscriber,
    /// The pipeline every envelope runs through.
    pub pipeline: Arc<Pipeline>,
}

impl Runtime {
    /// Create a new runtime instance, connecting to the bus and, for direct sends, the chat system.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the bus client, and make sure it can reach what it will use.
        let bus = Arc::new(PubSubClient::new(&config)?);
        bus.verify(config.dispatch == DispatchStrategy::Republish).await.context("Failed to connect to Pub/Sub")?;

        // Initialize the dispatcher.
        let dispatcher = match config.dispatch {
            DispatchStrategy::Direct => Dispatcher::Direct(ChatClient::keybase(&config).await?),
            DispatchStrategy::Republish => Dispatcher::Republish(BusPublisher::pubsub(bus.clone())),
        };

        let subscriber = BusSubscriber::pubsub(bus);
        let pipeline = Arc::new(Pipeline::from_config(&config, dispatcher));

        Ok(Self { config, subscriber, pipeline })
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn start(&self) -> Void {
        let shutdown = CancellationToken::new();

        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                wait_for_signal().await;
                info!("Shutdown signal received.");
                shutdown.cancel();
            }
        });

        self.run(shutdown).await
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Void {
        info!(
            "Relaying {:?} events from projects/{}/subscriptions/{} via {:?} dispatch to {} (decode_failure = {})",
            self.config.event_kind,
            self.config.project_id,
            self.config.subscription_id,
            self.pipeline.dispatcher().strategy(),
            self.config.default_route(),
            self.pipeline.decode_failure(),
        );

        subscription::receive(
            self.subscriber.clone(),
            self.pipeline.clone(),
            self.config.max_outstanding as usize,
            Duration::from_secs(self.config.pull_retry_secs),
            shutdown,
        )
        .await
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
