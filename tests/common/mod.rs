//! Shared test utilities for integration and E2E tests.
//!
//! This module provides fixtures that build throwaway git repositories with
//! the `git` CLI, so that clones can be exercised through `file://` URLs
//! without network access.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let Some(origin) = OriginRepo::with_files(&[("README.md", "hi\n")]) else {
//!         return;
//!     };
//!     // ... clone origin.url
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use assert_fs::prelude::*;
use assert_fs::TempDir;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{git_available, test_environment, OriginRepo};
}

/// Whether the `git` executable is on the `PATH`.
///
/// Tests that need git return early when it is missing.
#[allow(dead_code)]
pub fn git_available() -> bool {
    let available = which::which("git").is_ok();
    if !available {
        eprintln!("Skipping test: git is not installed");
    }
    available
}

/// An execution environment with the current `PATH` and a short timeout.
#[allow(dead_code)]
pub fn test_environment() -> texgit::exec::ExecEnvironment {
    let mut env = BTreeMap::new();
    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_string(), path);
    }
    texgit::exec::ExecEnvironment::new(env, Duration::from_secs(60))
}

#[allow(dead_code)]
fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=texgit",
            "-c",
            "user.email=texgit@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .status()
        .expect("failed to run git");
    assert!(status.success(), "git {:?} failed", args);
}

/// A local repository with one commit, reachable through a `file://` URL.
#[allow(dead_code)]
pub struct OriginRepo {
    pub temp: TempDir,
    pub url: String,
}

#[allow(dead_code)]
impl OriginRepo {
    /// Creates the repository with the given `(path, content)` files, or
    /// returns `None` when git is not available.
    pub fn with_files(files: &[(&str, &str)]) -> Option<Self> {
        if !git_available() {
            return None;
        }
        let temp = TempDir::new().unwrap();
        let origin = temp.child("origin");
        origin.create_dir_all().unwrap();
        for (path, content) in files {
            origin.child(path).write_str(content).unwrap();
        }
        git(origin.path(), &["init", "-q"]);
        git(origin.path(), &["add", "-A"]);
        git(origin.path(), &["commit", "-q", "-m", "initial commit"]);

        let path = origin.path().canonicalize().unwrap();
        let url = format!("file://{}", path.display());
        Some(Self { temp, url })
    }

    /// A repository with a README of seven numbered lines and a `src/` dir.
    pub fn sample() -> Option<Self> {
        Self::with_files(&[
            (
                "README.md",
                "line 1\nline 2\nline 3\nline 4\nline 5\nline 6\nline 7\n",
            ),
            ("src/hello.py", "print('hello')\n"),
            ("src/data.txt", "b\nc\na\n"),
        ])
    }

    pub fn path(&self) -> std::path::PathBuf {
        self.temp.path().join("origin")
    }

    /// The full hash of the origin's HEAD commit.
    pub fn head(&self) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(self.path())
            .args(["rev-parse", "HEAD"])
            .output()
            .expect("failed to run git");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}
