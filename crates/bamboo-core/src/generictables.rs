//! Backend-agnostic rule/chain/action/match vocabulary shared by every
//! table-syncing backend.
//!
//! Grounded on `pkg/generictables/{table,rule,match_criteria,action}.go`:
//! this module carries the naming constants and the `Chain`/`Rule` shape
//! byte-for-byte, but follows this specification's design note ("model
//! `Action` and `MatchCriteria` as sum types with a factory trait rather
//! than interface-with-virtual-dispatch") instead of the Go interface's
//! virtual dispatch. `Action` is a closed sum type; `MatchCriteria` is a
//! concrete accumulating builder; the `ActionFactory` trait is the seam a
//! future non-iptables backend would implement to change the action
//! vocabulary's rendering without touching the renderer's call sites.

use std::fmt;

/// Comment prefix tagging every agent-owned rule.
pub const HASH_PREFIX: &str = "bamboo:";
/// Log-action prefix (note the trailing space baked into the constant, it
/// is placed inside the `--log-prefix` quotes verbatim).
pub const LOG_PREFIX: &str = "[bambooFW] ";
pub const TABLE_FILTER: &str = "filter";
pub const DEFAULT_CHAIN_INPUT: &str = "INPUT";
pub const DEFAULT_CHAIN_OUTPUT: &str = "OUTPUT";
pub const CHAIN_NAME_PREFIX: &str = "BAMBOO-";
pub const OUR_DEFAULT_INPUT_CHAIN: &str = "BAMBOO-INPUT";
pub const OUR_DEFAULT_OUTPUT_CHAIN: &str = "BAMBOO-OUTPUT";
pub const OUR_INPUT_CHAIN_PREFIX: &str = "BAMBOO-PI-";
pub const OUR_OUTPUT_CHAIN_PREFIX: &str = "BAMBOO-PO-";

/// Every rule/chain/set this agent creates carries this length ceiling for
/// `--comment` text (§4.4); truncate user comments to this before emitting.
pub const MAX_COMMENT_LENGTH: usize = 256;

/// Closed vocabulary of kernel actions a rendered rule may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Accept,
    Drop,
    Reject { with: String },
    Return,
    Log { prefix: String },
    Goto { target: String },
    Jump { target: String },
}

impl Action {
    /// The `-j ...`/`-g ...` fragment appended after the match clause.
    pub fn to_parameter(&self) -> String {
        match self {
            Action::Accept => "-j ACCEPT".to_string(),
            Action::Drop => "-j DROP".to_string(),
            Action::Reject { with } => format!("-j REJECT --reject-with {with}"),
            Action::Return => "-j RETURN".to_string(),
            Action::Log { prefix } => format!(r#"-j LOG --log-prefix "{prefix}" --log-level 5"#),
            Action::Goto { target } => format!("-g {target}"),
            Action::Jump { target } => format!("-j {target}"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Accept => write!(f, "ACCEPT"),
            Action::Drop => write!(f, "DROP"),
            Action::Reject { .. } => write!(f, "REJECT"),
            Action::Return => write!(f, "RETURN"),
            Action::Log { .. } => write!(f, "LOG"),
            Action::Goto { target } => write!(f, "GOTO->{target}"),
            Action::Jump { target } => write!(f, "JUMP->{target}"),
        }
    }
}

/// Seam a backend implements to construct `Action` values; lets the
/// renderer stay agnostic of e.g. the log-prefix or reject target default.
pub trait ActionFactory {
    fn allow(&self) -> Action {
        Action::Accept
    }
    fn drop_rule(&self) -> Action {
        Action::Drop
    }
    fn reject(&self, with: &str) -> Action {
        Action::Reject { with: with.to_string() }
    }
    fn return_rule(&self) -> Action {
        Action::Return
    }
    fn log(&self, prefix: &str) -> Action {
        Action::Log { prefix: prefix.to_string() }
    }
    fn goto(&self, target: &str) -> Action {
        Action::Goto { target: target.to_string() }
    }
    fn jump(&self, target: &str) -> Action {
        Action::Jump { target: target.to_string() }
    }
}

/// Default factory producing the standard action vocabulary above.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultActionFactory;

impl ActionFactory for DefaultActionFactory {}

/// Accumulating match-clause builder; each method appends one rendered
/// token and returns `self` so callers can chain, mirroring the Go
/// interface's fluent API without virtual dispatch.
///
/// Grounded on `pkg/iptables/match_builder.go`'s token-building order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchCriteria {
    tokens: Vec<String>,
}

impl MatchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&self) -> String {
        self.tokens.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn conntrack_state(mut self, state_names: &str) -> Self {
        self.tokens.push(format!("-m conntrack --ctstate {state_names}"));
        self
    }

    pub fn not_conntrack_state(mut self, state_names: &str) -> Self {
        self.tokens.push(format!("-m conntrack ! --ctstate {state_names}"));
        self
    }

    pub fn protocol(mut self, protocol: &str) -> Self {
        self.tokens.push(format!("-p {protocol}"));
        self
    }

    pub fn not_protocol(mut self, protocol: &str) -> Self {
        self.tokens.push(format!("! -p {protocol}"));
        self
    }

    pub fn source_net(mut self, net: &str) -> Self {
        self.tokens.push(format!("--source {net}"));
        self
    }

    pub fn not_source_net(mut self, net: &str) -> Self {
        self.tokens.push(format!("! --source {net}"));
        self
    }

    pub fn dest_net(mut self, net: &str) -> Self {
        self.tokens.push(format!("--destination {net}"));
        self
    }

    pub fn not_dest_net(mut self, net: &str) -> Self {
        self.tokens.push(format!("! --destination {net}"));
        self
    }

    pub fn source_ip_set(mut self, name: &str) -> Self {
        self.tokens.push(format!("-m set --match-set {name} src"));
        self
    }

    pub fn not_source_ip_set(mut self, name: &str) -> Self {
        self.tokens.push(format!("-m set ! --match-set {name} src"));
        self
    }

    pub fn dest_ip_set(mut self, name: &str) -> Self {
        self.tokens.push(format!("-m set --match-set {name} dst"));
        self
    }

    pub fn not_dest_ip_set(mut self, name: &str) -> Self {
        self.tokens.push(format!("-m set ! --match-set {name} dst"));
        self
    }

    pub fn source_ports(mut self, ports: &[String]) -> Self {
        self.tokens
            .push(format!("-m multiport --source-ports {}", ports.join(",")));
        self
    }

    pub fn not_source_ports(mut self, ports: &[String]) -> Self {
        self.tokens
            .push(format!("-m multiport ! --source-ports {}", ports.join(",")));
        self
    }

    pub fn dest_ports(mut self, ports: &[String]) -> Self {
        self.tokens
            .push(format!("-m multiport --destination-ports {}", ports.join(",")));
        self
    }

    pub fn not_dest_ports(mut self, ports: &[String]) -> Self {
        self.tokens
            .push(format!("-m multiport ! --destination-ports {}", ports.join(",")));
        self
    }

    /// Append another builder's tokens after this one's (net/set axis combination).
    pub fn merge(mut self, other: &MatchCriteria) -> Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }
}

/// One rendered (or to-be-rendered) rule: match clause, action, and any
/// user-supplied comments (the hash comment is injected at emission time).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    pub match_criteria: MatchCriteria,
    pub action: Option<Action>,
    pub comments: Vec<String>,
}

/// An ordered, named collection of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chain {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl Chain {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), rules: Vec::new() }
    }
}

/// Seam implemented by a concrete table syncer (§4.4); kept separate from
/// `ActionFactory`/`MatchCriteria` since it is the I/O boundary, not the
/// pure-rendering boundary.
pub trait Table {
    fn set_default_rule_of_default_chain(&mut self, chain_name: &str, rule: Rule);
    fn update_chains(&mut self, chains: Vec<Chain>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_criteria_renders_tokens_in_order() {
        let m = MatchCriteria::new()
            .protocol("tcp")
            .dest_ports(&["22".to_string()]);
        assert_eq!(m.render(), "-p tcp -m multiport --destination-ports 22");
    }

    #[test]
    fn action_to_parameter_matches_kernel_text() {
        assert_eq!(Action::Accept.to_parameter(), "-j ACCEPT");
        assert_eq!(Action::Drop.to_parameter(), "-j DROP");
        assert_eq!(
            Action::Log { prefix: LOG_PREFIX.to_string() }.to_parameter(),
            r#"-j LOG --log-prefix "[bambooFW] " --log-level 5"#
        );
        assert_eq!(
            Action::Jump { target: "BAMBOO-PI-0".to_string() }.to_parameter(),
            "-j BAMBOO-PI-0"
        );
    }

    #[test]
    fn merge_concatenates_in_append_order() {
        let a = MatchCriteria::new().source_net("10.0.0.0/24");
        let b = MatchCriteria::new().dest_net("10.0.1.0/24");
        let merged = a.merge(&b);
        assert_eq!(merged.render(), "--source 10.0.0.0/24 --destination 10.0.1.0/24");
    }
}
