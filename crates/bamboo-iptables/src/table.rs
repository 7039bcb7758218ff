//! Table Syncer: differential `filter`-table reconciliation for one IP
//! family (§4.4).
//!
//! Grounded on `pkg/iptables/table.go`'s save-parsing regexes and apply
//! ordering; the splice-rule tail-stability logic (step 5) and the
//! nft-mode full-flush workaround (step 1) are transcribed from this
//! specification directly, since they are this crate's acceptance
//! criteria (§8 scenarios 1, 4, 5).

use std::collections::HashMap;

use regex::Regex;

use bamboo_core::generictables::{Chain, Rule, OUR_DEFAULT_INPUT_CHAIN, OUR_DEFAULT_OUTPUT_CHAIN, TABLE_FILTER};
use bamboo_core::hash::rule_hashes;
use bamboo_core::model::IpFamily;
use bamboo_core::AgentError;

use crate::command::{run_with_retry, CommandRunner};
use crate::lock::{LockGuard, DEFAULT_LOCK_PATH};
use crate::restore_builder::{
    render_append, render_delete_at, render_delete_raw, render_for_hash, render_replace,
};
use crate::version::Capabilities;

fn is_default_chain(name: &str) -> bool {
    name == OUR_DEFAULT_INPUT_CHAIN || name == OUR_DEFAULT_OUTPUT_CHAIN
}

/// Observed kernel state for one family's `filter` table, reloaded lazily
/// (§3 "Observed dataplane state").
#[derive(Debug, Default, Clone)]
struct Observed {
    /// Per-chain ordered hash-or-empty list, parallel to the rule lines
    /// present in that chain (BAMBOO-owned chains and the kernel default
    /// chains we spliced into).
    chain_hashes: HashMap<String, Vec<String>>,
    /// Verbatim `-A` lines for the kernel default chains, parallel to
    /// `chain_hashes`, used to emit exact `-D <verbatim>` deletions.
    default_chain_raw_rules: HashMap<String, Vec<String>>,
}

pub struct TableSyncer {
    family: IpFamily,
    capabilities: Capabilities,
    lock_timeout_seconds: i64,
    desired_chains: Vec<Chain>,
    splice_rules: HashMap<String, Rule>,
    observed: Observed,
    need_clean: bool,
}

impl TableSyncer {
    pub fn new(family: IpFamily, capabilities: Capabilities, lock_timeout_seconds: i64) -> Self {
        Self {
            family,
            capabilities,
            lock_timeout_seconds,
            desired_chains: Vec::new(),
            splice_rules: HashMap::new(),
            observed: Observed::default(),
            need_clean: false,
        }
    }

    /// Registers the single jump rule that must sit at the tail of
    /// `default_chain` (kernel `INPUT`/`OUTPUT`) (§4.4).
    pub fn set_splice_rule(&mut self, default_chain: &str, rule: Rule) {
        self.splice_rules.insert(default_chain.to_string(), rule);
    }

    /// Replaces the desired chain catalogue wholesale (§4.4, §4.5 Policy
    /// Manager).
    pub fn update_chains(&mut self, chains: Vec<Chain>) {
        self.desired_chains = chains;
    }

    /// Marks the table for full teardown on the next [`Self::clean`] call
    /// (§8 scenario 5, empty bundle after non-empty).
    pub fn request_clean(&mut self) {
        self.need_clean = true;
    }

    async fn reload_observed(&mut self, runner: &dyn CommandRunner) -> Result<(), AgentError> {
        let args = vec!["-t".to_string(), TABLE_FILTER.to_string()];
        let output = run_with_retry(runner, &self.capabilities.save_cmd, &args, None).await?;
        self.observed = parse_save_output(&output.stdout);
        Ok(())
    }

    /// One `iptables-restore --noflush` transaction implementing §4.4's
    /// six-step apply algorithm.
    pub async fn apply(&mut self, runner: &dyn CommandRunner) -> Result<(), AgentError> {
        self.reload_observed(runner).await?;

        let force_flush = self.capabilities.needs_nft_flush_workaround();
        let mut lines: Vec<String> = Vec::new();

        // Step 2: chain declarations.
        let mut current_hashes_by_chain: HashMap<String, Vec<String>> = HashMap::new();
        for chain in &self.desired_chains {
            let current = rule_hashes(chain, render_for_hash);
            let observed_matches =
                !force_flush && self.observed.chain_hashes.get(&chain.name) == Some(&current);
            if !observed_matches {
                let needs_declare = force_flush || !self.observed.chain_hashes.contains_key(&chain.name);
                if needs_declare {
                    lines.push(format!(":{} - [0:0]", chain.name));
                }
            }
            current_hashes_by_chain.insert(chain.name.clone(), current);
        }

        // Steps 3 & 4: per-chain rule diff.
        for chain in &self.desired_chains {
            let current = &current_hashes_by_chain[&chain.name];
            let previous: &[String] = if force_flush {
                &[]
            } else {
                self.observed.chain_hashes.get(&chain.name).map(Vec::as_slice).unwrap_or(&[])
            };
            if !force_flush && previous == current.as_slice() {
                continue;
            }
            let max_len = current.len().max(previous.len());
            for i in 0..max_len {
                let cur = current.get(i);
                let prev = previous.get(i);
                match (cur, prev) {
                    (Some(c), Some(p)) if c == p => {}
                    (Some(c), Some(_)) => {
                        lines.push(render_replace(&chain.rules[i], &chain.name, i + 1, c));
                    }
                    (None, Some(_)) => {
                        let delete_index =
                            if is_default_chain(&chain.name) { i + 1 } else { current.len() + 1 };
                        lines.push(render_delete_at(&chain.name, delete_index));
                    }
                    (Some(c), None) => {
                        lines.push(render_append(&chain.rules[i], &chain.name, c));
                    }
                    (None, None) => {}
                }
            }
        }

        // Step 5: splice rules in the kernel default chains.
        for (default_chain, splice_rule) in &self.splice_rules {
            let synthetic = Chain { name: default_chain.clone(), rules: vec![splice_rule.clone()] };
            let default_hash = rule_hashes(&synthetic, render_for_hash).remove(0);

            match self.observed.chain_hashes.get(default_chain) {
                None => {
                    lines.push(render_append(splice_rule, default_chain, &default_hash));
                }
                Some(hashes) if hashes.is_empty() => {
                    lines.push(render_append(splice_rule, default_chain, &default_hash));
                }
                Some(hashes) => {
                    let raws = self
                        .observed
                        .default_chain_raw_rules
                        .get(default_chain)
                        .cloned()
                        .unwrap_or_default();
                    let last_index = hashes.len() - 1;
                    for (i, hash) in hashes.iter().enumerate() {
                        if i == last_index {
                            if hash == &default_hash {
                                continue;
                            }
                            if let Some(del) = raws.get(i).and_then(|raw| render_delete_raw(raw)) {
                                lines.push(del);
                            }
                            lines.push(render_append(splice_rule, default_chain, &default_hash));
                        } else if !hash.is_empty() {
                            if let Some(del) = raws.get(i).and_then(|raw| render_delete_raw(raw)) {
                                lines.push(del);
                            }
                        }
                    }
                }
            }
        }

        // Step 6: unreferenced BAMBOO-* chain cleanup.
        let desired_names: std::collections::HashSet<&str> =
            self.desired_chains.iter().map(|c| c.name.as_str()).collect();
        let splice_targets: std::collections::HashSet<&str> =
            self.splice_rules.keys().map(String::as_str).collect();
        let observed_names: Vec<String> = self.observed.chain_hashes.keys().cloned().collect();
        for name in observed_names {
            if desired_names.contains(name.as_str()) || splice_targets.contains(name.as_str()) {
                continue;
            }
            lines.push(format!(":{name} - [0:0]"));
            lines.push(format!("--delete-chain {name}"));
        }

        if lines.is_empty() {
            return Ok(());
        }

        let mut transaction = vec![format!("*{TABLE_FILTER}")];
        transaction.extend(lines);
        transaction.push("COMMIT".to_string());
        let payload = transaction.join("\n") + "\n";

        self.run_restore(runner, &payload).await?;
        self.reload_observed(runner).await
    }

    /// Tears down every splice rule and every owned chain (§4.4 "clean",
    /// §8 scenario 5).
    pub async fn clean(&mut self, runner: &dyn CommandRunner) -> Result<(), AgentError> {
        if !self.need_clean {
            return Ok(());
        }
        self.reload_observed(runner).await?;

        let mut lines = Vec::new();
        for default_chain in self.splice_rules.keys() {
            if let (Some(hashes), Some(raws)) = (
                self.observed.chain_hashes.get(default_chain),
                self.observed.default_chain_raw_rules.get(default_chain),
            ) {
                for (i, hash) in hashes.iter().enumerate() {
                    if hash.is_empty() {
                        continue;
                    }
                    if let Some(del) = raws.get(i).and_then(|raw| render_delete_raw(raw)) {
                        lines.push(del);
                    }
                }
            }
        }
        for name in self.observed.chain_hashes.keys() {
            if name.starts_with(bamboo_core::generictables::CHAIN_NAME_PREFIX) {
                lines.push(format!(":{name} - [0:0]"));
                lines.push(format!("--delete-chain {name}"));
            }
        }

        if !lines.is_empty() {
            let mut transaction = vec![format!("*{TABLE_FILTER}")];
            transaction.extend(lines);
            transaction.push("COMMIT".to_string());
            let payload = transaction.join("\n") + "\n";
            self.run_restore(runner, &payload).await?;
        }

        self.need_clean = false;
        self.desired_chains.clear();
        self.reload_observed(runner).await
    }

    async fn run_restore(&self, runner: &dyn CommandRunner, payload: &str) -> Result<(), AgentError> {
        let mut args = vec!["--noflush".to_string(), "--verbose".to_string()];
        let _lock_guard = if self.capabilities.has_wait {
            args.push("--wait".to_string());
            if self.capabilities.wait_supports_seconds {
                args.push(self.lock_timeout_seconds.to_string());
            }
            None
        } else {
            Some(LockGuard::acquire(std::path::Path::new(DEFAULT_LOCK_PATH))?)
        };
        run_with_retry(runner, &self.capabilities.restore_cmd, &args, Some(payload)).await?;
        Ok(())
    }

    pub fn family(&self) -> IpFamily {
        self.family
    }
}

fn chain_header_regex() -> Regex {
    Regex::new(r"^:(\S+)\s").expect("static regex is valid")
}

fn append_line_regex() -> Regex {
    Regex::new(r"^-A (\S+) (.*)$").expect("static regex is valid")
}

fn hash_comment_regex() -> Regex {
    Regex::new(r#"--comment "?bamboo:([A-Za-z0-9_-]+)"?"#).expect("static regex is valid")
}

fn parse_save_output(text: &str) -> Observed {
    let header_re = chain_header_regex();
    let append_re = append_line_regex();
    let hash_re = hash_comment_regex();

    let mut chain_hashes: HashMap<String, Vec<String>> = HashMap::new();
    let mut raw_rules: HashMap<String, Vec<String>> = HashMap::new();

    for line in text.lines() {
        if let Some(caps) = header_re.captures(line) {
            chain_hashes.entry(caps[1].to_string()).or_default();
            continue;
        }
        if let Some(caps) = append_re.captures(line) {
            let chain = caps[1].to_string();
            let hash = hash_re.captures(line).map(|c| c[1].to_string()).unwrap_or_default();
            chain_hashes.entry(chain.clone()).or_default().push(hash);
            if !chain.starts_with(bamboo_core::generictables::CHAIN_NAME_PREFIX) {
                raw_rules.entry(chain).or_default().push(line.to_string());
            }
        }
    }

    chain_hashes.retain(|name, hashes| {
        name.starts_with(bamboo_core::generictables::CHAIN_NAME_PREFIX)
            || hashes.iter().any(|h| !h.is_empty())
    });
    raw_rules.retain(|name, _| chain_hashes.contains_key(name));

    Observed { chain_hashes, default_chain_raw_rules: raw_rules }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::version::{Capabilities, Mode, Version};
    use bamboo_core::generictables::{Action, MatchCriteria};
    use std::sync::Mutex;

    fn capabilities() -> Capabilities {
        Capabilities {
            family: IpFamily::V4,
            mode: Mode::Legacy,
            version: Version { major: 1, minor: 8, patch: 7 },
            has_wait: true,
            wait_supports_seconds: true,
            save_cmd: "iptables-save".into(),
            restore_cmd: "iptables-restore".into(),
        }
    }

    struct ScriptedRunner {
        save_output: String,
        restore_calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            _args: &[String],
            stdin: Option<&str>,
        ) -> anyhow::Result<CommandOutput> {
            if program.contains("save") {
                return Ok(CommandOutput { success: true, stdout: self.save_output.clone(), stderr: String::new() });
            }
            self.restore_calls.lock().unwrap().push(stdin.unwrap_or_default().to_string());
            Ok(CommandOutput { success: true, stdout: String::new(), stderr: String::new() })
        }
    }

    #[tokio::test]
    async fn empty_kernel_produces_create_and_append_transaction() {
        let runner = ScriptedRunner { save_output: "*filter\nCOMMIT\n".into(), restore_calls: Mutex::new(Vec::new()) };
        let mut syncer = TableSyncer::new(IpFamily::V4, capabilities(), 3);
        let chain = Chain {
            name: "BAMBOO-INPUT".to_string(),
            rules: vec![
                Rule {
                    match_criteria: MatchCriteria::new().conntrack_state("ESTABLISHED,RELATED"),
                    action: Some(Action::Accept),
                    comments: Vec::new(),
                },
                Rule { match_criteria: MatchCriteria::new(), action: Some(Action::Drop), comments: Vec::new() },
            ],
        };
        syncer.update_chains(vec![chain]);
        syncer.set_splice_rule(
            "INPUT",
            Rule {
                match_criteria: MatchCriteria::new(),
                action: Some(Action::Jump { target: "BAMBOO-INPUT".into() }),
                comments: Vec::new(),
            },
        );

        syncer.apply(&runner).await.unwrap();

        let calls = runner.restore_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains(":BAMBOO-INPUT - [0:0]"));
        assert!(calls[0].contains("-A BAMBOO-INPUT"));
        assert!(calls[0].contains("-A INPUT"));
    }

    #[tokio::test]
    async fn second_apply_with_unchanged_state_emits_nothing() {
        let mut syncer = TableSyncer::new(IpFamily::V4, capabilities(), 3);
        let chain = Chain {
            name: "BAMBOO-INPUT".to_string(),
            rules: vec![Rule { match_criteria: MatchCriteria::new(), action: Some(Action::Drop), comments: Vec::new() }],
        };
        let expected_hash = rule_hashes(&chain, render_for_hash)[0].clone();
        let save_with_real_hash = format!(
            "*filter\n:BAMBOO-INPUT - [0:0]\n-A BAMBOO-INPUT -m comment --comment \"bamboo:{expected_hash}\" -j DROP\nCOMMIT\n"
        );
        let runner = ScriptedRunner { save_output: save_with_real_hash, restore_calls: Mutex::new(Vec::new()) };
        syncer.update_chains(vec![chain]);

        syncer.apply(&runner).await.unwrap();

        assert!(runner.restore_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn parses_chain_headers_and_hash_comments() {
        let text = "*filter\n\
:INPUT - [0:0]\n\
:BAMBOO-INPUT - [0:0]\n\
-A INPUT -j BAMBOO-INPUT\n\
-A BAMBOO-INPUT -m comment --comment \"bamboo:abc123\" -j DROP\n\
COMMIT\n";
        let observed = parse_save_output(text);
        assert_eq!(observed.chain_hashes["BAMBOO-INPUT"], vec!["abc123".to_string()]);
        assert_eq!(observed.chain_hashes["INPUT"], vec!["".to_string()]);
        assert_eq!(observed.default_chain_raw_rules["INPUT"][0], "-A INPUT -j BAMBOO-INPUT");
    }
}
