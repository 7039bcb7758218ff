//! IPSet Syncer: differential `ipset`-state reconciliation for one IP
//! family (§4.3).
//!
//! Grounded on `pkg/ipset/ipset.go`'s save-parsing regexes and the
//! create/add/del diff; this crate splits `clean_unused` out from `apply`
//! per §4.3 ("separately from `apply()` and only after the iptables pass
//! has completed"), which the original combines into one pass.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use regex::Regex;

use bamboo_core::model::IpFamily;
use bamboo_core::AgentError;

use crate::command::{run_with_retry, CommandRunner};

const SET_KIND: &str = "hash:net";

/// Normalize a raw CIDR/IP string to its canonical CIDR form; bare
/// addresses become `/32` (v4) or `/128` (v6). Returns `None` for
/// malformed input (§7 category 4: dropped with a warning, not a hard
/// error).
pub fn normalize_cidr(raw: &str) -> Option<String> {
    if let Ok(net) = IpNet::from_str(raw) {
        return Some(net.to_string());
    }
    match IpAddr::from_str(raw) {
        Ok(IpAddr::V4(addr)) => Some(format!("{addr}/32")),
        Ok(IpAddr::V6(addr)) => Some(format!("{addr}/128")),
        Err(_) => None,
    }
}

pub struct IpSetSyncer {
    family: IpFamily,
    desired: HashMap<String, HashSet<String>>,
    observed: HashMap<String, HashSet<String>>,
    unused: HashSet<String>,
}

impl IpSetSyncer {
    pub fn new(family: IpFamily) -> Self {
        Self { family, desired: HashMap::new(), observed: HashMap::new(), unused: HashSet::new() }
    }

    /// Bulk-replaces the desired set catalogue (§4.5 IPSet Manager).
    pub fn replace_desired(&mut self, desired: HashMap<String, HashSet<String>>) {
        self.desired = desired;
    }

    pub fn family(&self) -> IpFamily {
        self.family
    }

    /// Diffs `desired` against freshly reloaded kernel state and emits the
    /// minimal `ipset restore` program; sets present in observed but
    /// absent from desired are recorded as unused rather than destroyed
    /// here (§4.3).
    pub async fn apply(&mut self, runner: &dyn CommandRunner) -> Result<(), AgentError> {
        let save_output = run_with_retry(runner, "ipset", &["save".to_string()], None).await?;
        self.observed = parse_save_output(&save_output.stdout, self.family);

        let mut lines = Vec::new();
        let family_name = self.family.inet_name();

        for (name, members) in &self.desired {
            if !self.observed.contains_key(name) {
                lines.push(format!("create {name} {SET_KIND} family {family_name}"));
            }
            let observed_members = self.observed.get(name);
            for member in members {
                let present = observed_members.map(|m| m.contains(member)).unwrap_or(false);
                if !present {
                    lines.push(format!("add {name} {member}"));
                }
            }
            if let Some(observed_members) = observed_members {
                for member in observed_members {
                    if !members.contains(member) {
                        lines.push(format!("del {name} {member}"));
                    }
                }
            }
        }

        self.unused = self
            .observed
            .keys()
            .filter(|name| !self.desired.contains_key(*name))
            .cloned()
            .collect();

        if lines.is_empty() {
            return Ok(());
        }
        let payload = lines.join("\n") + "\n";
        run_with_retry(runner, "ipset", &["restore".to_string()], Some(&payload)).await?;
        Ok(())
    }

    /// Destroys sets observed during the last [`Self::apply`] that are no
    /// longer desired; must run after the table syncer's pass has
    /// completed so no rule still references them (§4.3, §5 ordering).
    pub async fn clean_unused(&mut self, runner: &dyn CommandRunner) -> Result<(), AgentError> {
        if self.unused.is_empty() {
            return Ok(());
        }
        let lines: Vec<String> = self.unused.iter().map(|name| format!("destroy {name}")).collect();
        let payload = lines.join("\n") + "\n";
        run_with_retry(runner, "ipset", &["restore".to_string()], Some(&payload)).await?;
        self.unused.clear();
        Ok(())
    }
}

fn set_header_regex() -> Regex {
    Regex::new(r"^create (BAMBOO-[A-Za-z0-9_-]+) \S+ family (inet|inet6) .*$").expect("static regex is valid")
}

fn member_regex() -> Regex {
    Regex::new(r"^add (BAMBOO-[A-Za-z0-9_-]+) (\S+).*$").expect("static regex is valid")
}

fn parse_save_output(text: &str, family: IpFamily) -> HashMap<String, HashSet<String>> {
    let header_re = set_header_regex();
    let member_re = member_regex();
    let wanted_family = family.inet_name();

    let mut sets: HashMap<String, HashSet<String>> = HashMap::new();
    for line in text.lines() {
        if let Some(caps) = header_re.captures(line) {
            if &caps[2] == wanted_family {
                sets.entry(caps[1].to_string()).or_default();
            }
            continue;
        }
        if let Some(caps) = member_re.captures(line) {
            let name = caps[1].to_string();
            if let Some(members) = sets.get_mut(&name) {
                if let Some(cidr) = normalize_cidr(&caps[2]) {
                    members.insert(cidr);
                }
            }
        }
    }
    sets
}
