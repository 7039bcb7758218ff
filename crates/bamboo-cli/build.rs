//! Stamps build metadata (`spec.md` §6 `--version` surface) into env vars
//! consumed by `main.rs` via `env!`. No crate in this workspace's stack
//! covers this (no `vergen` precedent in the retrieval pack), so this
//! shells out to `git` directly, the way a hand-rolled `build.rs` would.

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rustc-env=BAMBOO_BUILD_BRANCH={}", git_branch());
    println!("cargo:rustc-env=BAMBOO_BUILD_DATE={}", build_date());
    println!("cargo:rustc-env=BAMBOO_BUILD_ORG=Bamboo Firewall Authors");
}

fn git_branch() -> String {
    Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn build_date() -> String {
    Command::new("date")
        .args(["-u", "+%Y-%m-%dT%H:%M:%SZ"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
