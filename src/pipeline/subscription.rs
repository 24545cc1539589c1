//! The long-lived receive loop.
//!
//! Pulls envelopes from the inbound bus and runs each one through the pipeline on
//! its own task. A semaphore bounds how many envelopes are in flight, and each
//! pull asks for no more than there are free slots.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::{
    base::types::Void,
    service::bus::{BusSubscriber, is_permanent},
};

use super::Pipeline;

/// Pause after an empty pull, so an idle subscription does not spin.
const IDLE_PAUSE: Duration = Duration::from_millis(250);

/// Receive until `shutdown` is cancelled.
///
/// On cancellation no new envelopes are pulled, and the call returns once every
/// envelope already handed to the pipeline has finished. Transient pull errors are
/// retried after `pull_retry`; a permanent one stops the loop the same way and is
/// then returned.
#[instrument(skip_all)]
pub async fn receive(subscriber: BusSubscriber, pipeline: Arc<Pipeline>, max_outstanding: usize, pull_retry: Duration, shutdown: CancellationToken) -> Void {
    let permits = Arc::new(Semaphore::new(max_outstanding.max(1)));
    let mut in_flight = JoinSet::new();
    let mut failure = None;

    info!("Receiving {:?} events ({} at a time) ...", pipeline.kind(), max_outstanding);

    loop {
        while let Some(result) = in_flight.try_join_next() {
            report(result);
        }

        // Wait for a free slot before pulling anything.

        let first = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => permit?,
        };

        let batch_size = 1 + permits.available_permits();

        let pulled = tokio::select! {
            _ = shutdown.cancelled() => break,
            pulled = subscriber.pull(batch_size) => pulled,
        };

        let envelopes = match pulled {
            Ok(envelopes) => envelopes,
            Err(err) if is_permanent(&err) => {
                error!("Failed to pull envelopes, giving up: {:#}", err);
                failure = Some(err.context("Subscription can no longer be pulled"));
                break;
            }
            Err(err) => {
                warn!("Failed to pull envelopes, retrying in {:?}: {:#}", pull_retry, err);
                drop(first);

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pull_retry) => continue,
                }
            }
        };

        if envelopes.is_empty() {
            drop(first);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(IDLE_PAUSE) => continue,
            }
        }

        // Hand each envelope to its own task, holding a slot until it finishes.

        let mut first = Some(first);

        for envelope in envelopes {
            let permit = match first.take() {
                Some(permit) => permit,
                None => permits.clone().acquire_owned().await?,
            };

            let subscriber = subscriber.clone();
            let pipeline = pipeline.clone();

            in_flight.spawn(
                async move {
                    let _permit = permit;
                    pipeline.process(&envelope, &subscriber).await
                }
                .in_current_span(),
            );
        }
    }

    info!("Receive stopping; waiting for {} in-flight envelopes ...", in_flight.len());

    while let Some(result) = in_flight.join_next().await {
        report(result);
    }

    info!("Receive loop stopped.");

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn report<T: std::fmt::Debug>(result: Result<T, JoinError>) {
    match result {
        Ok(disposition) => debug!("Envelope finished: {:?}", disposition),
        Err(err) => error!("Pipeline task failed: {}", err),
    }
}
