//! Rule Renderer (§4.1): pure `policies -> chains` compilation.
//!
//! Grounded on `pkg/iptables/renderer.go` for the append/hash rendering
//! shape and `pkg/generictables/{action,match_criteria}.go` for the
//! vocabulary; the cartesian-expansion rule-lowering algorithm itself is
//! implemented directly from this specification's §4.1 prose, since the
//! original's `ruleToIptablesRules` is an empty stub (`return
//! []generictables.Rule{}`) and provides no working reference.

use bamboo_core::generictables::{
    Action, Chain, MatchCriteria, Rule, LOG_PREFIX, OUR_DEFAULT_INPUT_CHAIN,
    OUR_DEFAULT_OUTPUT_CHAIN, OUR_INPUT_CHAIN_PREFIX, OUR_OUTPUT_CHAIN_PREFIX,
};
use bamboo_core::model::{Action as PolicyAction, IpFamily, ParsedGnp, ParsedRule};
use bamboo_core::names::NameConvention;

/// A port list is split into groups of at most this many "slots" (a
/// single port is 1 slot, an `N:M` range is 2) before being rendered as a
/// `-m multiport` match, since the kernel module caps multiport entries.
pub const MAX_PORT_SLOTS: usize = 15;

fn port_slots(port: &str) -> usize {
    if port.contains(':') {
        2
    } else {
        1
    }
}

/// Partition `ports` in order into groups of at most [`MAX_PORT_SLOTS`]
/// slots, preserving every element verbatim.
pub fn split_ports(ports: &[String]) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_slots = 0usize;
    for port in ports {
        let slots = port_slots(port);
        if !current.is_empty() && current_slots + slots > MAX_PORT_SLOTS {
            groups.push(std::mem::take(&mut current));
            current_slots = 0;
        }
        current.push(port.clone());
        current_slots += slots;
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Combine two independent sides of an axis into the list of pairings the
/// cartesian expansion should emit: full cartesian when both sides are
/// nonempty, otherwise iterate whichever side is nonempty, or a single
/// empty pairing when both are empty (axis contributes nothing).
fn axis_combos<T: Clone>(src: &[T], dst: &[T]) -> Vec<(Option<T>, Option<T>)> {
    match (src.is_empty(), dst.is_empty()) {
        (true, true) => vec![(None, None)],
        (false, true) => src.iter().cloned().map(|s| (Some(s), None)).collect(),
        (true, false) => dst.iter().cloned().map(|d| (None, Some(d))).collect(),
        (false, false) => {
            let mut out = Vec::with_capacity(src.len() * dst.len());
            for s in src {
                for d in dst {
                    out.push((Some(s.clone()), Some(d.clone())));
                }
            }
            out
        }
    }
}

fn port_axis(rule: &ParsedRule) -> Vec<MatchCriteria> {
    let src_groups = split_ports(&rule.src_ports);
    let dst_groups = split_ports(&rule.dst_ports);
    axis_combos(&src_groups, &dst_groups)
        .into_iter()
        .map(|(src, dst)| {
            let mut m = MatchCriteria::new();
            if let Some(group) = src {
                m = if rule.src_ports_negated {
                    m.not_source_ports(&group)
                } else {
                    m.source_ports(&group)
                };
            }
            if let Some(group) = dst {
                m = if rule.dst_ports_negated {
                    m.not_dest_ports(&group)
                } else {
                    m.dest_ports(&group)
                };
            }
            m
        })
        .collect()
}

fn net_axis(rule: &ParsedRule) -> Vec<MatchCriteria> {
    axis_combos(&rule.src_nets, &rule.dst_nets)
        .into_iter()
        .map(|(src, dst)| {
            let mut m = MatchCriteria::new();
            if let Some(net) = src {
                m = if rule.src_nets_negated { m.not_source_net(&net) } else { m.source_net(&net) };
            }
            if let Some(net) = dst {
                m = if rule.dst_nets_negated { m.not_dest_net(&net) } else { m.dest_net(&net) };
            }
            m
        })
        .collect()
}

fn resolve_set_names(refs: &[String], names: &NameConvention) -> Vec<String> {
    refs.iter()
        .filter_map(|uuid| names.get_main_name_of_set_by_uuid(uuid).map(str::to_string))
        .collect()
}

/// Unlike the port and net axes, the set axis carries no negation flag in
/// the data model (§3) — a GNS/HEP reference is always matched positively.
fn set_axis(rule: &ParsedRule, names: &NameConvention) -> Vec<MatchCriteria> {
    let src_names = resolve_set_names(&rule.src_gns_refs, names);
    let dst_names = resolve_set_names(&rule.dst_gns_refs, names);
    axis_combos(&src_names, &dst_names)
        .into_iter()
        .map(|(src, dst)| {
            let mut m = MatchCriteria::new();
            if let Some(name) = src {
                m = m.source_ip_set(&name);
            }
            if let Some(name) = dst {
                m = m.dest_ip_set(&name);
            }
            m
        })
        .collect()
}

fn map_action(action: Option<PolicyAction>) -> Action {
    match action {
        Some(PolicyAction::Allow) => Action::Accept,
        Some(PolicyAction::Deny) => Action::Drop,
        Some(PolicyAction::Log) => Action::Log { prefix: LOG_PREFIX.to_string() },
        None => Action::Accept,
    }
}

/// Lower one parsed rule into zero or more kernel rules for `family`.
///
/// Returns an empty vec when `rule.ip_version != family` (§4.1, §4 DM
/// invariant 5).
pub fn lower_rule(rule: &ParsedRule, family: IpFamily, names: &NameConvention) -> Vec<Rule> {
    if rule.ip_version != family.as_u8() {
        return Vec::new();
    }

    let mut prefix = MatchCriteria::new();
    if let Some(protocol) = &rule.protocol {
        prefix = if rule.protocol_negated {
            prefix.not_protocol(protocol)
        } else {
            prefix.protocol(protocol)
        };
    }

    let ports = port_axis(rule);
    let nets = net_axis(rule);
    let sets = set_axis(rule, names);
    let action = map_action(rule.action);

    let mut out = Vec::with_capacity(ports.len() * nets.len() * sets.len());
    for port_match in &ports {
        for net_match in &nets {
            for set_match in &sets {
                let combined = prefix.clone().merge(port_match).merge(net_match).merge(set_match);
                out.push(Rule {
                    match_criteria: combined,
                    action: Some(action.clone()),
                    comments: Vec::new(),
                });
            }
        }
    }
    out
}

fn lower_rules(rules: &[ParsedRule], family: IpFamily, names: &NameConvention) -> Vec<Rule> {
    rules.iter().flat_map(|r| lower_rule(r, family, names)).collect()
}

fn jump_rule(target: &str) -> Rule {
    Rule {
        match_criteria: MatchCriteria::new(),
        action: Some(Action::Jump { target: target.to_string() }),
        comments: Vec::new(),
    }
}

fn accept_established_rule() -> Rule {
    Rule {
        match_criteria: MatchCriteria::new().conntrack_state("ESTABLISHED,RELATED"),
        action: Some(Action::Accept),
        comments: Vec::new(),
    }
}

fn drop_all_rule() -> Rule {
    Rule {
        match_criteria: MatchCriteria::new(),
        action: Some(Action::Drop),
        comments: Vec::new(),
    }
}

/// Render `policies` into the full chain set for one family (§4.1).
///
/// `api_server_v4` is only consulted when `family == IpFamily::V4`, to
/// build the output-chain allowance for the initial policy fetch.
pub fn render(policies: &[ParsedGnp], family: IpFamily, api_server_v4: &str, names: &NameConvention) -> Vec<Chain> {
    let mut user_chains = Vec::new();
    let mut input_jumps = Vec::new();
    let mut output_jumps = Vec::new();

    for (i, policy) in policies.iter().enumerate() {
        let inbound = lower_rules(&policy.inbound_rules, family, names);
        if !inbound.is_empty() {
            let name = format!("{OUR_INPUT_CHAIN_PREFIX}{i}");
            input_jumps.push(jump_rule(&name));
            user_chains.push(Chain { name, rules: inbound });
        }
        let outbound = lower_rules(&policy.outbound_rules, family, names);
        if !outbound.is_empty() {
            let name = format!("{OUR_OUTPUT_CHAIN_PREFIX}{i}");
            output_jumps.push(jump_rule(&name));
            user_chains.push(Chain { name, rules: outbound });
        }
    }

    let mut input_rules = vec![accept_established_rule()];
    input_rules.extend(input_jumps);
    input_rules.push(drop_all_rule());
    let input_chain = Chain { name: OUR_DEFAULT_INPUT_CHAIN.to_string(), rules: input_rules };

    let mut output_rules = vec![accept_established_rule()];
    if family == IpFamily::V4 && !api_server_v4.is_empty() {
        output_rules.push(Rule {
            match_criteria: MatchCriteria::new()
                .protocol("tcp")
                .conntrack_state("NEW")
                .dest_net(api_server_v4),
            action: Some(Action::Accept),
            comments: Vec::new(),
        });
    }
    output_rules.extend(output_jumps);
    output_rules.push(drop_all_rule());
    let output_chain = Chain { name: OUR_DEFAULT_OUTPUT_CHAIN.to_string(), rules: output_rules };

    let mut chains = vec![input_chain, output_chain];
    chains.extend(user_chains);
    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use bamboo_core::names::SourceTag;

    fn allow_rule(ip_version: u8, protocol: &str, dst_ports: Vec<&str>) -> ParsedRule {
        ParsedRule {
            action: Some(PolicyAction::Allow),
            ip_version,
            protocol: Some(protocol.to_string()),
            dst_ports: dst_ports.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn split_ports_partitions_by_slot_budget() {
        let ports: Vec<String> = (1..=20).map(|p| p.to_string()).collect();
        let groups = split_ports(&ports);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 15);
        assert_eq!(groups[1].len(), 5);
        let flat: Vec<&String> = groups.iter().flatten().collect();
        let expected: Vec<&String> = ports.iter().collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn split_ports_counts_ranges_as_two_slots() {
        let mut ports: Vec<String> = (1..=14).map(|p| p.to_string()).collect();
        ports.push("100:200".to_string());
        let groups = split_ports(&ports);
        // 14 singles (14 slots) + one range (2 slots) = 16 > 15, so the
        // range spills into a second group.
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 14);
        assert_eq!(groups[1], vec!["100:200".to_string()]);
    }

    #[test]
    fn rule_dropped_for_mismatched_family() {
        let rule = allow_rule(6, "tcp", vec!["22"]);
        let names = NameConvention::new();
        let rules = lower_rule(&rule, IpFamily::V4, &names);
        assert!(rules.is_empty());
    }

    #[test]
    fn single_port_rule_renders_expected_text() {
        let rule = allow_rule(4, "tcp", vec!["22"]);
        let names = NameConvention::new();
        let rules = lower_rule(&rule, IpFamily::V4, &names);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].match_criteria.render(), "-p tcp -m multiport --destination-ports 22");
        assert_eq!(rules[0].action, Some(Action::Accept));
    }

    #[test]
    fn set_axis_resolves_uuid_to_canonical_name() {
        let mut names = NameConvention::new();
        names.set_main_name_of_set("gns-1", 0, IpFamily::V4, SourceTag::Gns, "web");
        let rule = ParsedRule {
            action: Some(PolicyAction::Allow),
            ip_version: 4,
            protocol: Some("tcp".into()),
            dst_ports: vec!["22".into()],
            dst_gns_refs: vec!["gns-1".into()],
            ..Default::default()
        };
        let rules = lower_rule(&rule, IpFamily::V4, &names);
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules[0].match_criteria.render(),
            "-p tcp -m multiport --destination-ports 22 -m set --match-set BAMBOO-gnsv4-0-web dst"
        );
    }

    #[test]
    fn empty_bundle_renders_two_default_chains_only() {
        let names = NameConvention::new();
        let chains = render(&[], IpFamily::V4, "203.0.113.5", &names);
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].name, "BAMBOO-INPUT");
        assert_eq!(chains[0].rules.len(), 2); // established-accept, drop
        assert_eq!(chains[1].name, "BAMBOO-OUTPUT");
        assert_eq!(chains[1].rules.len(), 3); // established-accept, api-server allow, drop
    }

    #[test]
    fn render_is_deterministic() {
        let names = NameConvention::new();
        let policy = ParsedGnp {
            uuid: "p1".into(),
            version: 1,
            name: "web".into(),
            inbound_rules: vec![allow_rule(4, "tcp", vec!["22"])],
            outbound_rules: vec![],
        };
        let a = render(std::slice::from_ref(&policy), IpFamily::V4, "", &names);
        let b = render(std::slice::from_ref(&policy), IpFamily::V4, "", &names);
        assert_eq!(a, b);
    }

    #[test]
    fn policy_produces_pi_chain_and_input_jump() {
        let names = NameConvention::new();
        let policy = ParsedGnp {
            uuid: "p1".into(),
            version: 1,
            name: "web".into(),
            inbound_rules: vec![allow_rule(4, "tcp", vec!["22"])],
            outbound_rules: vec![],
        };
        let chains = render(&[policy], IpFamily::V4, "", &names);
        assert_eq!(chains.len(), 3);
        let pi_chain = chains.iter().find(|c| c.name == "BAMBOO-PI-0").expect("PI chain present");
        assert_eq!(pi_chain.rules.len(), 1);
        let input_chain = &chains[0];
        assert_eq!(input_chain.rules[1].action, Some(Action::Jump { target: "BAMBOO-PI-0".into() }));
    }
}
