//! Internal Dataplane: the top-level reconciliation loop (§4.6).
//!
//! Grounded on this specification's §4.6 prose and §5's ordering
//! invariants directly; the original's `internal_dataplane.go` wires raw
//! `mangle`/`nat`/`raw` tables this crate's Non-goals exclude, so only the
//! `filter`-table, HEP/GNS/GNP shape survives here. The apply-phase
//! fan-out uses `futures::future::join_all` as its "structured task
//! group" (§9), since that is the concurrency idiom this pack's
//! dependency stack (`futures`) already carries.

use std::time::Duration;

use bamboo_core::generictables::{Action, MatchCriteria, Rule};
use bamboo_core::model::{HostEndpointPolicy, IpFamily};
use bamboo_core::names::NameConvention;
use bamboo_core::AgentError;

use bamboo_iptables::command::{CommandRunner as IptablesRunner, SystemCommandRunner as SystemIptablesRunner};
use bamboo_iptables::table::TableSyncer;
use bamboo_iptables::version::Capabilities;

use bamboo_ipset::command::{CommandRunner as IpsetRunner, SystemCommandRunner as SystemIpsetRunner};
use bamboo_ipset::syncer::IpSetSyncer;

use crate::cancel::Canceller;
use crate::managers::{IpSetManager, PolicyManager};

const DEFAULT_CHAIN_INPUT: &str = "INPUT";
const DEFAULT_CHAIN_OUTPUT: &str = "OUTPUT";

fn jump_rule(target: &str) -> Rule {
    Rule {
        match_criteria: MatchCriteria::new(),
        action: Some(Action::Jump { target: target.to_string() }),
        comments: Vec::new(),
    }
}

/// One family's full syncer/manager group (§4.6).
struct FamilyGroup {
    family: IpFamily,
    names: NameConvention,
    ipset_syncer: IpSetSyncer,
    table_syncer: TableSyncer,
}

impl FamilyGroup {
    fn new(family: IpFamily, capabilities: Capabilities, lock_timeout_seconds: i64) -> Self {
        let mut table_syncer = TableSyncer::new(family, capabilities, lock_timeout_seconds);
        table_syncer.set_splice_rule(DEFAULT_CHAIN_INPUT, jump_rule(bamboo_core::generictables::OUR_DEFAULT_INPUT_CHAIN));
        table_syncer.set_splice_rule(DEFAULT_CHAIN_OUTPUT, jump_rule(bamboo_core::generictables::OUR_DEFAULT_OUTPUT_CHAIN));
        Self { family, names: NameConvention::new(), ipset_syncer: IpSetSyncer::new(family), table_syncer }
    }

    fn on_update(&mut self, bundle: &HostEndpointPolicy, api_server_v4: &str) {
        IpSetManager::on_update(bundle, self.family, &mut self.names, &mut self.ipset_syncer);
        PolicyManager::on_update(bundle, self.family, api_server_v4, &self.names, &mut self.table_syncer);
    }
}

/// Owns the inbox channel and per-family syncer groups; the single
/// reconciliation worker described in §4.6.
pub struct InternalDataplane {
    families: Vec<FamilyGroup>,
    inbox: tokio::sync::mpsc::Receiver<HostEndpointPolicy>,
    canceller: Canceller,
    refresh_interval: Duration,
    api_server_v4: String,
    datastore_in_sync: bool,
    dataplane_needs_sync: bool,
    iptables_runner: Box<dyn IptablesRunner>,
    ipset_runner: Box<dyn IpsetRunner>,
}

impl InternalDataplane {
    /// `capacity(1)` approximates the unbuffered/rendezvous channel §5
    /// describes: tokio's mpsc requires a nonzero buffer, so the sender
    /// still blocks on a full channel, just with one message of slack.
    pub fn new(
        v4_capabilities: Option<Capabilities>,
        v6_capabilities: Option<Capabilities>,
        lock_timeout_seconds: i64,
        refresh_interval: Duration,
        api_server_v4: String,
        canceller: Canceller,
    ) -> (Self, tokio::sync::mpsc::Sender<HostEndpointPolicy>) {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let mut families = Vec::new();
        if let Some(caps) = v4_capabilities {
            families.push(FamilyGroup::new(IpFamily::V4, caps, lock_timeout_seconds));
        }
        if let Some(caps) = v6_capabilities {
            families.push(FamilyGroup::new(IpFamily::V6, caps, lock_timeout_seconds));
        }
        let dataplane = Self {
            families,
            inbox: rx,
            canceller,
            refresh_interval,
            api_server_v4,
            datastore_in_sync: false,
            dataplane_needs_sync: false,
            iptables_runner: Box::new(SystemIptablesRunner),
            ipset_runner: Box::new(SystemIpsetRunner),
        };
        (dataplane, tx)
    }

    /// The reconciliation loop: blocks on (inbox, refresh timer, cancel)
    /// and performs an apply cycle whenever both `datastore_in_sync` and
    /// `dataplane_needs_sync` are true (§4.6).
    pub async fn run(mut self) -> Result<(), AgentError> {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.canceller.cancelled() => {
                    tracing::info!("dataplane worker cancelled");
                    return Ok(());
                }
                maybe_bundle = self.inbox.recv() => {
                    match maybe_bundle {
                        Some(bundle) => {
                            for group in &mut self.families {
                                group.on_update(&bundle, &self.api_server_v4);
                            }
                            self.datastore_in_sync = true;
                            self.dataplane_needs_sync = true;
                        }
                        None => {
                            tracing::warn!("dataplane inbox closed, exiting");
                            return Ok(());
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.dataplane_needs_sync = true;
                }
            }

            if self.datastore_in_sync && self.dataplane_needs_sync {
                self.dataplane_needs_sync = false;
                if let Err(e) = self.apply_cycle().await {
                    tracing::warn!(error = %e, "apply cycle failed, will retry next cycle");
                }
            }
        }
    }

    /// All ipset syncers apply, then all table syncers apply, then all
    /// ipset syncers clean unused sets — strictly in that order so
    /// `-m set --match-set` references always resolve before any `ipset
    /// restore` pass and no referenced set is destroyed (§5 "Ordering
    /// guarantees").
    async fn apply_cycle(&mut self) -> Result<(), AgentError> {
        let ipset_runner = self.ipset_runner.as_ref();
        let ipset_results =
            futures::future::join_all(self.families.iter_mut().map(|g| g.ipset_syncer.apply(ipset_runner))).await;
        for result in ipset_results {
            result?;
        }

        let iptables_runner = self.iptables_runner.as_ref();
        let table_results =
            futures::future::join_all(self.families.iter_mut().map(|g| async {
                g.table_syncer.clean(iptables_runner).await?;
                g.table_syncer.apply(iptables_runner).await
            }))
            .await;
        for result in table_results {
            result?;
        }

        let clean_results =
            futures::future::join_all(self.families.iter_mut().map(|g| g.ipset_syncer.clean_unused(ipset_runner)))
                .await;
        for result in clean_results {
            result?;
        }
        Ok(())
    }
}
