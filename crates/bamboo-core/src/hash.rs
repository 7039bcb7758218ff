//! Chained content hash for rules within a chain (§4.2).
//!
//! Grounded on `pkg/generictables/rule.go`'s `RuleHashes`: `h0 =
//! sha224(chain.name)`, then `h[i] = sha224(h[i-1] || rendered(rule[i]))`,
//! each hash base64url-encoded and truncated to 16 characters. The caller
//! supplies the rendering closure so this module never depends on a
//! specific backend's kernel-text format.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha224};

use crate::generictables::{Chain, Rule};

pub const HASH_LENGTH: usize = 16;

/// Literal placeholder substituted for the real hash comment while
/// rendering a rule purely to compute its hash (§9 "Hash stability").
pub const HASH_PLACEHOLDER: &str = "HASH";

/// Compute one chained hash per rule in `chain`, in order.
///
/// `render_for_hash` must render rule `i` exactly as the backend's
/// `RenderAppend` would, except substituting [`HASH_PLACEHOLDER`] for the
/// real hash comment.
pub fn rule_hashes<F>(chain: &Chain, render_for_hash: F) -> Vec<String>
where
    F: Fn(&Rule, &str) -> String,
{
    let mut running = Sha224::digest(chain.name.as_bytes()).to_vec();
    let mut hashes = Vec::with_capacity(chain.rules.len());
    for rule in &chain.rules {
        let rendered = render_for_hash(rule, &chain.name);
        let mut hasher = Sha224::new();
        hasher.update(&running);
        hasher.update(rendered.as_bytes());
        running = hasher.finalize().to_vec();
        hashes.push(truncate_hash(&running));
    }
    hashes
}

fn truncate_hash(bytes: &[u8]) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(bytes);
    encoded.chars().take(HASH_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_render(rule: &Rule, chain_name: &str) -> String {
        format!("{chain_name}:{}", rule.match_criteria.render())
    }

    #[test]
    fn hashes_are_chained_and_truncated() {
        let mut chain = Chain::new("BAMBOO-PI-0");
        chain.rules.push(Rule {
            match_criteria: crate::generictables::MatchCriteria::new().protocol("tcp"),
            action: None,
            comments: vec![],
        });
        chain.rules.push(Rule {
            match_criteria: crate::generictables::MatchCriteria::new().protocol("udp"),
            action: None,
            comments: vec![],
        });
        let hashes = rule_hashes(&chain, fake_render);
        assert_eq!(hashes.len(), 2);
        for h in &hashes {
            assert_eq!(h.len(), HASH_LENGTH);
        }
        assert_ne!(hashes[0], hashes[1]);
    }

    #[test]
    fn changing_an_earlier_rule_invalidates_later_hashes() {
        let mut chain_a = Chain::new("BAMBOO-PI-0");
        chain_a.rules.push(Rule {
            match_criteria: crate::generictables::MatchCriteria::new().protocol("tcp"),
            action: None,
            comments: vec![],
        });
        chain_a.rules.push(Rule {
            match_criteria: crate::generictables::MatchCriteria::new().protocol("udp"),
            action: None,
            comments: vec![],
        });

        let mut chain_b = chain_a.clone();
        chain_b.rules[0].match_criteria = crate::generictables::MatchCriteria::new().protocol("icmp");

        let hashes_a = rule_hashes(&chain_a, fake_render);
        let hashes_b = rule_hashes(&chain_b, fake_render);
        assert_ne!(hashes_a[0], hashes_b[0]);
        assert_ne!(hashes_a[1], hashes_b[1]);
    }

    #[test]
    fn deterministic_for_equal_inputs() {
        let mut chain = Chain::new("BAMBOO-INPUT");
        chain.rules.push(Rule {
            match_criteria: crate::generictables::MatchCriteria::new().conntrack_state("ESTABLISHED,RELATED"),
            action: None,
            comments: vec![],
        });
        let h1 = rule_hashes(&chain, fake_render);
        let h2 = rule_hashes(&chain, fake_render);
        assert_eq!(h1, h2);
    }
}
