//! Datastore Connector: the periodic policy-fetch worker (§4.7, §5).
//!
//! Grounded on this specification's §4.7 prose directly (the original's
//! `datastore_connector.go` drives a long-poll/watch API this
//! specification's Non-goals exclude in favor of a plain interval timer).
//! Owns the fetch timer and feeds fetched bundles into the dataplane's
//! inbox channel; change-detection uses `Metadata::differs_from` so an
//! unchanged bundle never wakes the dataplane worker for nothing.

use std::time::Duration;

use bamboo_core::model::{HostEndpointPolicy, Metadata};
use bamboo_core::AgentError;

use crate::client::PolicyClient;
use crate::Canceller;

/// Polls the policy server on a fixed interval and forwards changed
/// bundles to the dataplane. A single long-lived task (§4.7).
pub struct DatastoreConnector {
    client: PolicyClient,
    outbox: tokio::sync::mpsc::Sender<HostEndpointPolicy>,
    canceller: Canceller,
    refresh_interval: Duration,
    last_metadata: Metadata,
    had_hep: bool,
}

impl DatastoreConnector {
    pub fn new(
        client: PolicyClient,
        outbox: tokio::sync::mpsc::Sender<HostEndpointPolicy>,
        canceller: Canceller,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            client,
            outbox,
            canceller,
            refresh_interval,
            last_metadata: Metadata::default(),
            had_hep: false,
        }
    }

    /// Blocks on (timer, cancel); on each tick, fetches, applies §4.7's
    /// HEP-count rules, and forwards the bundle only if its metadata
    /// differs from the last one sent. Fetch errors are logged and
    /// retried next tick, never fatal (§7 category 3).
    pub async fn run(mut self) -> Result<(), AgentError> {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.canceller.cancelled() => {
                    tracing::info!("datastore connector cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    async fn poll_once(&mut self) {
        let mut bundle = match self.client.fetch_policies().await {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::warn!(error = %e, "fetching policy bundle failed, retrying next tick");
                return;
            }
        };

        // §4.7: no HEP returned and none previously present — nothing to
        // converge to, skip silently rather than flushing every tick.
        if bundle.parsed_heps.is_empty() && !self.had_hep {
            tracing::debug!("no host endpoints returned, none previously present");
            return;
        }

        // §4.7: the host's sole HEP disappeared — flush once to an empty
        // bundle so the managers drive every family back to empty desired
        // state (the table syncer interprets this via `clean()`).
        if bundle.parsed_heps.is_empty() {
            tracing::info!("host endpoint no longer present, flushing empty policy bundle");
            self.had_hep = false;
            self.last_metadata = bundle.metadata.clone();
            self.send(bundle).await;
            return;
        }

        // §4.7: "if one or more HEPs: take the first".
        bundle.parsed_heps.truncate(1);
        self.had_hep = true;

        if !bundle.metadata.differs_from(&self.last_metadata) {
            return;
        }
        self.last_metadata = bundle.metadata.clone();
        self.send(bundle).await;
    }

    async fn send(&mut self, bundle: HostEndpointPolicy) {
        // backpressured: capacity-1 channel, so this blocks until the
        // dataplane worker has drained the previous bundle.
        if self.outbox.send(bundle).await.is_err() {
            tracing::warn!("dataplane inbox closed, connector has nowhere to send");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bamboo_core::model::ParsedHep;

    #[test]
    fn unchanged_metadata_is_not_a_difference() {
        let a = Metadata::default();
        let b = Metadata::default();
        assert!(!a.differs_from(&b));
    }

    #[test]
    fn multiple_heps_are_truncated_to_the_first() {
        let mut bundle = HostEndpointPolicy {
            parsed_heps: vec![
                ParsedHep { uuid: "h1".into(), name: "first".into(), ..Default::default() },
                ParsedHep { uuid: "h2".into(), name: "second".into(), ..Default::default() },
            ],
            ..Default::default()
        };
        bundle.parsed_heps.truncate(1);
        assert_eq!(bundle.parsed_heps.len(), 1);
        assert_eq!(bundle.parsed_heps[0].uuid, "h1");
    }
}
