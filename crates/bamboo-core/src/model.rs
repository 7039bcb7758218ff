//! Wire/data-model types for policy bundles fetched from the policy server.
//!
//! Field shapes mirror `pkg/apiserver/dto/{gnp,rule,hep,gns,host_endpoint}.go`
//! in the original implementation; this is the single schema this crate
//! treats as authoritative (the Go source also carries an older, simplified
//! `pkg/model` variant that this crate does not reproduce).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Action a rule takes when its match criteria are satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
    Log,
}

/// IP family a rule or syncer operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpFamily {
    V4 = 4,
    V6 = 6,
}

impl IpFamily {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn inet_name(self) -> &'static str {
        match self {
            IpFamily::V4 => "inet",
            IpFamily::V6 => "inet6",
        }
    }
}

/// One match+action rule as parsed from a `GlobalNetworkPolicy`.
///
/// Ports are kept as literal strings (`"22"` or `"1000:2000"`) exactly as
/// received; the renderer is responsible for slot-counting and splitting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRule {
    pub action: Option<Action>,
    pub ip_version: u8,
    pub protocol: Option<String>,
    #[serde(default)]
    pub protocol_negated: bool,
    #[serde(default)]
    pub src_nets: Vec<String>,
    #[serde(default)]
    pub src_nets_negated: bool,
    #[serde(default)]
    pub src_gns_refs: Vec<String>,
    #[serde(default)]
    pub src_ports: Vec<String>,
    #[serde(default)]
    pub src_ports_negated: bool,
    #[serde(default)]
    pub dst_nets: Vec<String>,
    #[serde(default)]
    pub dst_nets_negated: bool,
    #[serde(default)]
    pub dst_gns_refs: Vec<String>,
    #[serde(default)]
    pub dst_ports: Vec<String>,
    #[serde(default)]
    pub dst_ports_negated: bool,
}

/// A Global Network Policy: a named bundle of inbound/outbound rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedGnp {
    pub uuid: String,
    pub version: u64,
    pub name: String,
    #[serde(default)]
    pub inbound_rules: Vec<ParsedRule>,
    #[serde(default)]
    pub outbound_rules: Vec<ParsedRule>,
}

/// A Host Endpoint: a host identity bound to one or more IPs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedHep {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub ips_v4: Vec<String>,
    #[serde(default)]
    pub ips_v6: Vec<String>,
}

/// A Global Network Set: a named list of CIDRs referenced by rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedGns {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub nets_v4: Vec<String>,
    #[serde(default)]
    pub nets_v6: Vec<String>,
}

/// Cheap-change-detection metadata: uuid -> version, one map per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub hep_versions: HashMap<String, u64>,
    #[serde(default)]
    pub gnp_versions: HashMap<String, u64>,
    #[serde(default)]
    pub gns_versions: HashMap<String, u64>,
}

impl Metadata {
    /// True iff any of the three maps differs in size, is missing a key
    /// present in `other`, or holds a different version for a shared key.
    pub fn differs_from(&self, other: &Metadata) -> bool {
        Self::map_differs(&self.hep_versions, &other.hep_versions)
            || Self::map_differs(&self.gnp_versions, &other.gnp_versions)
            || Self::map_differs(&self.gns_versions, &other.gns_versions)
    }

    fn map_differs(a: &HashMap<String, u64>, b: &HashMap<String, u64>) -> bool {
        if a.len() != b.len() {
            return true;
        }
        for (k, v) in a {
            match b.get(k) {
                Some(bv) if bv == v => continue,
                _ => return true,
            }
        }
        false
    }
}

/// The full policy bundle returned by a `fetchPolicies` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEndpointPolicy {
    pub metadata: Metadata,
    #[serde(default)]
    pub parsed_gnps: Vec<ParsedGnp>,
    #[serde(default)]
    pub parsed_heps: Vec<ParsedHep>,
    #[serde(default)]
    pub parsed_gnss: Vec<ParsedGns>,
}

/// The error envelope returned by the policy server on non-200 responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: i64,
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_differs_on_size_change() {
        let mut a = Metadata::default();
        a.hep_versions.insert("h1".into(), 1);
        let b = Metadata::default();
        assert!(a.differs_from(&b));
        assert!(b.differs_from(&a));
    }

    #[test]
    fn metadata_differs_on_value_change() {
        let mut a = Metadata::default();
        a.gnp_versions.insert("p1".into(), 1);
        let mut b = a.clone();
        b.gnp_versions.insert("p1".into(), 2);
        assert!(a.differs_from(&b));
    }

    #[test]
    fn metadata_identical_maps_do_not_differ() {
        let mut a = Metadata::default();
        a.gns_versions.insert("s1".into(), 7);
        let b = a.clone();
        assert!(!a.differs_from(&b));
    }
}
