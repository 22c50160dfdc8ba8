//! Default values for texgit.
//!
//! This module provides centralized constants used across the library and
//! the command-line tool, ensuring consistency and avoiding duplication.

use std::time::Duration;

/// Directory, relative to the build-metadata file, that holds the cache.
///
/// This can be overridden by the `--repo-dir` CLI flag or the
/// `TEXGIT_REPO_DIR` environment variable.
pub const DEFAULT_REPO_DIR: &str = "__git__";

/// Name of the persisted realm/name index inside the cache directory.
pub const INDEX_FILE: &str = ".cache.json";

/// Directory inside the cache directory that holds one sub-directory per realm.
pub const REALMS_DIR: &str = "realms";

/// Marker substituted for sensitive paths in captured output.
pub const BASE_PATH_REPLACEMENT: &str = "{...}";

/// Upper bound for a shallow clone.
pub const CLONE_TIMEOUT: Duration = Duration::from_secs(600);

/// Upper bound for `git log` / `git config` queries on a local clone.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(120);

/// Default upper bound for user commands, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3600;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_ordered() {
        assert!(METADATA_TIMEOUT < CLONE_TIMEOUT);
        assert!(CLONE_TIMEOUT < Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS));
    }
}
