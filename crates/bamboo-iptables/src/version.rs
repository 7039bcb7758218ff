//! Command discovery and version probing (§4.4 "Command discovery").
//!
//! Grounded on `pkg/iptables/version.go`'s version-string regex and the
//! nft-vs-legacy mode detection; the `command_exists` probe follows
//! `gw-troubleshoot/src/docker.rs`'s pattern of spawning the candidate and
//! inspecting the resulting `io::Error` kind rather than shelling out to
//! `which`.

use std::io::ErrorKind;

use regex::Regex;

use bamboo_core::model::IpFamily;
use bamboo_core::AgentError;

/// iptables' two rule-table backends; `nft` wraps the nf_tables kernel API,
/// `legacy` talks to the old `ip_tables` one directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Nft,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }
}

/// Resolved command-line capabilities for one family's iptables binary.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub family: IpFamily,
    pub mode: Mode,
    pub version: Version,
    pub has_wait: bool,
    pub wait_supports_seconds: bool,
    pub save_cmd: String,
    pub restore_cmd: String,
}

impl Capabilities {
    /// The `mode=nft && version<1.8.3` workaround branch (§9 "NFT bug
    /// workaround"): forces a full flush-and-rebuild on every mutation
    /// instead of trusting the observed-hash diff.
    pub fn needs_nft_flush_workaround(&self) -> bool {
        self.mode == Mode::Nft && !self.version.at_least(1, 8, 3)
    }
}

fn base_name(family: IpFamily) -> &'static str {
    match family {
        IpFamily::V4 => "iptables",
        IpFamily::V6 => "ip6tables",
    }
}

fn version_regex() -> Regex {
    Regex::new(r"v(\d+)\.(\d+)\.(\d+)(?:\s+\((\w+)\))?").expect("static regex is valid")
}

/// Parse `iptables --version`-shaped text into a [`Version`] and [`Mode`].
pub fn parse_version_output(text: &str) -> Result<(Version, Mode), AgentError> {
    let re = version_regex();
    let caps = re
        .captures(text)
        .ok_or_else(|| AgentError::Startup(format!("could not parse iptables version from {text:?}")))?;
    let major = caps[1].parse().unwrap_or(0);
    let minor = caps[2].parse().unwrap_or(0);
    let patch = caps[3].parse().unwrap_or(0);
    let mode = match caps.get(4) {
        Some(token) if token.as_str().contains("nf_tables") => Mode::Nft,
        _ => Mode::Legacy,
    };
    Ok((Version { major, minor, patch }, mode))
}

fn command_exists(program: &str) -> bool {
    match std::process::Command::new(program).arg("--version").output() {
        Ok(_) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(_) => true,
    }
}

/// Discover `<base>[-nft|-legacy]-<save|restore>` per §4.4 "Command
/// discovery": probe mode-qualified names first, then the unqualified
/// pair, first present on `$PATH` wins.
fn discover_direction(base: &str, mode: Mode, direction: &str) -> Result<String, AgentError> {
    let mode_token = match mode {
        Mode::Nft => "nft",
        Mode::Legacy => "legacy",
    };
    let qualified = format!("{base}-{mode_token}-{direction}");
    if command_exists(&qualified) {
        return Ok(qualified);
    }
    let unqualified = format!("{base}-{direction}");
    if command_exists(&unqualified) {
        return Ok(unqualified);
    }
    Err(AgentError::Startup(format!(
        "no usable {base} {direction} binary found ({qualified} or {unqualified})"
    )))
}

/// Probe `iptables --version`/`ip6tables --version` and discover the
/// matching save/restore binaries for `family`.
pub fn probe(family: IpFamily) -> Result<Capabilities, AgentError> {
    let base = base_name(family);
    let output = std::process::Command::new(base)
        .arg("--version")
        .output()
        .map_err(|e| AgentError::Startup(format!("running {base} --version: {e}")))?;
    let text = String::from_utf8_lossy(&output.stdout);
    let (version, mode) = parse_version_output(&text)?;

    let save_cmd = discover_direction(base, mode, "save")?;
    let restore_cmd = discover_direction(base, mode, "restore")?;

    Ok(Capabilities {
        family,
        mode,
        version,
        has_wait: version.at_least(1, 4, 20),
        wait_supports_seconds: version.at_least(1, 6, 0),
        save_cmd,
        restore_cmd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nft_mode_from_parenthesized_token() {
        let (v, mode) = parse_version_output("iptables v1.8.7 (nf_tables)").unwrap();
        assert_eq!(v, Version { major: 1, minor: 8, patch: 7 });
        assert_eq!(mode, Mode::Nft);
    }

    #[test]
    fn parses_legacy_mode_when_no_parenthesized_token() {
        let (v, mode) = parse_version_output("iptables v1.4.21").unwrap();
        assert_eq!(v, Version { major: 1, minor: 4, patch: 21 });
        assert_eq!(mode, Mode::Legacy);
    }

    #[test]
    fn unparseable_version_is_startup_error() {
        let err = parse_version_output("not iptables at all").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn nft_workaround_only_below_1_8_3() {
        let old = Capabilities {
            family: IpFamily::V4,
            mode: Mode::Nft,
            version: Version { major: 1, minor: 8, patch: 2 },
            has_wait: true,
            wait_supports_seconds: true,
            save_cmd: "iptables-nft-save".into(),
            restore_cmd: "iptables-nft-restore".into(),
        };
        assert!(old.needs_nft_flush_workaround());
        let new = Capabilities { version: Version { major: 1, minor: 8, patch: 3 }, ..old.clone() };
        assert!(!new.needs_nft_flush_workaround());
        let legacy = Capabilities { mode: Mode::Legacy, ..old };
        assert!(!legacy.needs_nft_flush_workaround());
    }
}
