//! # texgit
//!
//! This library provides a persistent cache for external resources needed by
//! document builds: files from git repositories, post-processed versions of
//! those files, and the captured output of programs. It is used by the
//! `texgit` command-line tool, which resolves the requests a LaTeX document
//! writes into its `.aux` file.
//!
//! ## Quick Example
//!
//! ```
//! use texgit::registry::ResourceRegistry;
//!
//! let temp = tempfile::tempdir().unwrap();
//! let mut registry = ResourceRegistry::open(temp.path()).unwrap();
//!
//! // The first request creates the file, later ones hand back the same path.
//! let first = registry.get_file("output", "listing", None, Some(".txt")).unwrap();
//! assert!(first.is_created());
//! let again = registry.get_file("output", "listing", None, None).unwrap();
//! assert!(!again.is_created());
//! assert_eq!(first.path(), again.path());
//!
//! registry.close().unwrap();
//! ```
//!
//! ## Core Concepts
//!
//! The library is built from layered managers, each owning the one below:
//!
//! - **Resource Registry (`registry`)**: Maps `(realm, name)` keys to stable
//!   file and directory paths and persists the mapping across runs.
//! - **Repository Resolver (`repository`, `git`)**: Shallow-clones each remote
//!   repository once into the registry's `git` realm and resolves files
//!   inside it together with commit-pinned web links.
//! - **Process & Output Cache (`process`, `exec`)**: Runs commands once per
//!   name, optionally inside a repository or on a repository file's content,
//!   and stores their output.
//! - **Output Sanitizer (`sanitize`)**: Replaces local absolute paths in
//!   captured output with a fixed placeholder.
//! - **Build-Metadata Runner (`metadata`)**: Parses the request lines of an
//!   `.aux` file and writes the responses back.
//!
//! ## Execution Flow
//!
//! `metadata::run` reads the `.aux` file, lazily opens a `ProcessCache` in
//! the cache directory on the first request, resolves requests in file
//! order, closes the cache (which persists the registry index), and only
//! then rewrites the `.aux` file.

pub mod defaults;
pub mod error;
pub mod exec;
pub mod git;
pub mod metadata;
pub mod process;
pub mod registry;
pub mod repository;
pub mod sanitize;

#[cfg(test)]
mod key_proptest;
