//! # CLI Command Implementations
//!
//! Each subcommand of the `texgit` command-line tool lives in its own file.
//! A command module contains an `Args` struct derived with `clap` and an
//! `execute` function that takes the parsed arguments and calls into the
//! `texgit` library.

pub mod cache;
pub mod run;
