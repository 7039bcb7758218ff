//! Advisory `/run/xtables.lock` guard (§4.4, §9 "Advisory file lock").
//!
//! Used only when the discovered `iptables-restore` binary lacks native
//! `--wait` support. Grounded on this specification's §9 design note
//! ("encapsulate as a scoped acquisition guard that releases on all exit
//! paths"); the original Go implementation relies on iptables' own
//! `--wait` handling and has no standalone lock file of its own.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use bamboo_core::AgentError;

pub const DEFAULT_LOCK_PATH: &str = "/run/xtables.lock";

/// Holds an exclusive advisory lock on `path` for as long as it lives;
/// `Drop` releases it unconditionally, including on panic unwinds.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn acquire(path: &Path) -> Result<Self, AgentError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|e| AgentError::Kernel(format!("opening lock file {path:?}: {e}")))?;
        file.lock_exclusive()
            .map_err(|e| AgentError::Kernel(format!("acquiring lock {path:?}: {e}")))?;
        Ok(Self { file, path: path.to_path_buf() })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release xtables lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_a_temp_lock_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("bamboo-xtables-test.lock");
        {
            let _guard = LockGuard::acquire(&path).expect("first acquire succeeds");
        }
        let _guard2 = LockGuard::acquire(&path).expect("lock released after drop");
    }
}
