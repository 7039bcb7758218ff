//! Managers: translate an incoming policy bundle into desired-state calls
//! on one family's syncers (§4.5).
//!
//! Grounded on `pkg/dataplane/{ipset_manager,policy_manager}.go`'s
//! `OnUpdate` naming; the Name Convention registry is rebuilt by the
//! IPSet Manager at the start of every bundle and read back by the Policy
//! Manager within the same call, matching §5's "consistent snapshot per
//! cycle" note.

use std::collections::{HashMap, HashSet};

use bamboo_core::model::{HostEndpointPolicy, IpFamily};
use bamboo_core::names::{NameConvention, SourceTag};

use bamboo_iptables::renderer::render;
use bamboo_iptables::table::TableSyncer;
use bamboo_ipset::syncer::{normalize_cidr, IpSetSyncer};

/// Builds the desired ipset catalogue from a bundle's HEPs and GNSs
/// (§4.5). Rebuilds `names` from scratch: the UUID→name registry has no
/// meaning across bundles, only within the cycle that produced it.
pub struct IpSetManager;

impl IpSetManager {
    pub fn on_update(bundle: &HostEndpointPolicy, family: IpFamily, names: &mut NameConvention, syncer: &mut IpSetSyncer) {
        names.clear();
        let mut desired: HashMap<String, HashSet<String>> = HashMap::new();

        for (i, hep) in bundle.parsed_heps.iter().enumerate() {
            let addrs: &[String] = match family {
                IpFamily::V4 => &hep.ips_v4,
                IpFamily::V6 => &hep.ips_v6,
            };
            if addrs.is_empty() {
                continue;
            }
            let name = names.set_main_name_of_set(&hep.uuid, i, family, SourceTag::Hep, &hep.name);
            let members: HashSet<String> = addrs.iter().filter_map(|a| normalize_cidr(a)).collect();
            desired.insert(name, members);
        }

        for (i, gns) in bundle.parsed_gnss.iter().enumerate() {
            let nets: &[String] = match family {
                IpFamily::V4 => &gns.nets_v4,
                IpFamily::V6 => &gns.nets_v6,
            };
            if nets.is_empty() {
                continue;
            }
            let name = names.set_main_name_of_set(&gns.uuid, i, family, SourceTag::Gns, &gns.name);
            let members: HashSet<String> = nets.iter().filter_map(|n| normalize_cidr(n)).collect();
            desired.insert(name, members);
        }

        syncer.replace_desired(desired);
    }
}

/// Renders a bundle's GNPs into chains for one family and hands them to
/// the Table Syncer (§4.5). Must run after [`IpSetManager::on_update`] has
/// populated `names` for the same bundle.
pub struct PolicyManager;

impl PolicyManager {
    pub fn on_update(
        bundle: &HostEndpointPolicy,
        family: IpFamily,
        api_server_v4: &str,
        names: &NameConvention,
        syncer: &mut TableSyncer,
    ) {
        if bundle.parsed_heps.is_empty() && bundle.parsed_gnps.is_empty() && bundle.parsed_gnss.is_empty() {
            // §4.7: an empty bundle (no HEPs) is the connector's signal
            // that this host has no policy at all; the table syncer tears
            // itself down via `clean()` rather than converging to the
            // still-nonempty default-chain skeleton `render` would emit.
            syncer.request_clean();
            return;
        }
        let chains = render(&bundle.parsed_gnps, family, api_server_v4, names);
        syncer.update_chains(chains);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bamboo_core::model::ParsedHep;

    #[test]
    fn ipset_manager_skips_hep_with_no_family_addresses() {
        let bundle = HostEndpointPolicy {
            parsed_heps: vec![ParsedHep {
                uuid: "h1".into(),
                name: "web".into(),
                ips_v4: vec![],
                ips_v6: vec!["fe80::1".into()],
            }],
            ..Default::default()
        };
        let mut names = NameConvention::new();
        let mut syncer = IpSetSyncer::new(IpFamily::V4);
        IpSetManager::on_update(&bundle, IpFamily::V4, &mut names, &mut syncer);
        assert!(names.get_main_name_of_set_by_uuid("h1").is_none());
    }

    #[test]
    fn empty_bundle_requests_table_clean() {
        let bundle = HostEndpointPolicy::default();
        let names = NameConvention::new();
        let capabilities = bamboo_iptables::version::Capabilities {
            family: IpFamily::V4,
            mode: bamboo_iptables::version::Mode::Legacy,
            version: bamboo_iptables::version::Version { major: 1, minor: 8, patch: 7 },
            has_wait: true,
            wait_supports_seconds: true,
            save_cmd: "iptables-save".into(),
            restore_cmd: "iptables-restore".into(),
        };
        let mut syncer = TableSyncer::new(IpFamily::V4, capabilities, 3);
        PolicyManager::on_update(&bundle, IpFamily::V4, "", &names, &mut syncer);
    }
}
