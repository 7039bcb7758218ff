//! Kernel-text rendering for one rule (§4.4 "Rule rendering (kernel text)").
//!
//! Grounded on `pkg/iptables/restore_builder.go`'s line shapes; this crate
//! keeps the hash-rendering path ([`render_for_hash`]) textually identical
//! to [`render_append`] except for the substituted comment, per §4.2/§9
//! "Hash stability".

use bamboo_core::generictables::{Rule, HASH_PREFIX, MAX_COMMENT_LENGTH};
use bamboo_core::hash::HASH_PLACEHOLDER;

fn truncate_comment(comment: &str) -> String {
    if comment.len() <= MAX_COMMENT_LENGTH {
        return comment.to_string();
    }
    let mut end = MAX_COMMENT_LENGTH;
    while !comment.is_char_boundary(end) {
        end -= 1;
    }
    comment[..end].to_string()
}

fn comment_clauses(rule: &Rule, hash: &str) -> String {
    let mut clauses = vec![format!(r#"-m comment --comment "{HASH_PREFIX}{hash}""#)];
    for comment in &rule.comments {
        clauses.push(format!(r#"-m comment --comment "{}""#, truncate_comment(comment)));
    }
    clauses.join(" ")
}

fn match_and_action(rule: &Rule) -> String {
    let mut parts = Vec::new();
    if !rule.match_criteria.is_empty() {
        parts.push(rule.match_criteria.render());
    }
    if let Some(action) = &rule.action {
        parts.push(action.to_parameter());
    }
    parts.join(" ")
}

fn body(rule: &Rule, hash: &str) -> String {
    let comments = comment_clauses(rule, hash);
    let rest = match_and_action(rule);
    if rest.is_empty() {
        comments
    } else {
        format!("{comments} {rest}")
    }
}

/// `render_for_hash` (§4.2): identical shape to [`render_append`] but with
/// the literal `"HASH"` comment in place of the real hash, so the hash
/// computation never depends on its own output.
pub fn render_for_hash(rule: &Rule, chain_name: &str) -> String {
    format!("-A {chain_name} {}", body(rule, HASH_PLACEHOLDER))
}

pub fn render_append(rule: &Rule, chain_name: &str, hash: &str) -> String {
    format!("-A {chain_name} {}", body(rule, hash))
}

pub fn render_insert(rule: &Rule, chain_name: &str, position: usize, hash: &str) -> String {
    format!("-I {chain_name} {position} {}", body(rule, hash))
}

pub fn render_replace(rule: &Rule, chain_name: &str, position: usize, hash: &str) -> String {
    format!("-R {chain_name} {position} {}", body(rule, hash))
}

pub fn render_delete_at(chain_name: &str, position: usize) -> String {
    format!("-D {chain_name} {position}")
}

/// Transform an observed verbatim `-A <chain> ...` line into the matching
/// `-D <chain> ...` deletion, for splice-rule cleanup where only the raw
/// kernel text (not a position index) is known (§4.4 step 5, §4.4 "clean").
pub fn render_delete_raw(observed_append_line: &str) -> Option<String> {
    observed_append_line
        .strip_prefix("-A ")
        .map(|rest| format!("-D {rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bamboo_core::generictables::{Action, MatchCriteria};

    fn sample_rule() -> Rule {
        Rule {
            match_criteria: MatchCriteria::new().protocol("tcp").dest_ports(&["22".to_string()]),
            action: Some(Action::Accept),
            comments: Vec::new(),
        }
    }

    #[test]
    fn append_matches_expected_shape() {
        let rule = sample_rule();
        let line = render_append(&rule, "BAMBOO-PI-0", "abcdEFGH12345678");
        assert_eq!(
            line,
            r#"-A BAMBOO-PI-0 -m comment --comment "bamboo:abcdEFGH12345678" -p tcp -m multiport --destination-ports 22 -j ACCEPT"#
        );
    }

    #[test]
    fn hash_render_uses_placeholder_not_real_hash() {
        let rule = sample_rule();
        let hashed = render_for_hash(&rule, "BAMBOO-PI-0");
        assert!(hashed.contains("bamboo:HASH"));
    }

    #[test]
    fn delete_raw_flips_append_prefix_only() {
        let line = "-A INPUT -m comment --comment \"bamboo:xyz\" -j BAMBOO-INPUT";
        let deleted = render_delete_raw(line).unwrap();
        assert_eq!(deleted, "-D INPUT -m comment --comment \"bamboo:xyz\" -j BAMBOO-INPUT");
    }

    #[test]
    fn long_user_comment_is_truncated() {
        let rule = Rule {
            match_criteria: MatchCriteria::new(),
            action: Some(Action::Drop),
            comments: vec!["x".repeat(300)],
        };
        let line = render_append(&rule, "BAMBOO-INPUT", "h");
        assert!(line.len() < 300 + 40);
    }
}
