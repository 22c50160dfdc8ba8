//! # Cache Command Implementation
//!
//! This module implements the `cache` subcommand, which inspects and removes
//! a texgit cache directory.
//!
//! ## Subcommands
//!
//! - **`list`**: Display every registry entry with its realm, name, and size
//! - **`clean`**: Remove the whole cache directory

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use walkdir::WalkDir;

use texgit::defaults::{DEFAULT_REPO_DIR, INDEX_FILE, REALMS_DIR};
use texgit::registry::ResourceRegistry;

/// Inspect or remove a texgit cache directory
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// The cache directory.
    ///
    /// Can also be set with the `TEXGIT_REPO_DIR` environment variable.
    #[arg(
        long,
        value_name = "DIR",
        env = "TEXGIT_REPO_DIR",
        default_value = DEFAULT_REPO_DIR,
        global = true
    )]
    pub repo_dir: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheSubcommand {
    /// List all cache entries
    List(ListArgs),
    /// Remove the cache directory
    Clean(CleanArgs),
}

/// Arguments for the cache list command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the cache clean command
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Show what would be deleted without actually deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt and delete immediately
    #[arg(long)]
    pub yes: bool,
}

/// Cache entry information
#[derive(Debug, Clone, Serialize)]
struct CacheEntry {
    realm: String,
    name: String,
    path: PathBuf,
    size: u64,
    file_count: usize,
}

/// Execute the `cache` command.
pub fn execute(args: CacheArgs) -> Result<()> {
    match args.command {
        CacheSubcommand::List(list_args) => execute_list(&args.repo_dir, list_args),
        CacheSubcommand::Clean(clean_args) => execute_clean(&args.repo_dir, clean_args),
    }
}

/// Whether `dir` holds a texgit registry.
fn is_cache_dir(dir: &Path) -> bool {
    dir.join(REALMS_DIR).is_dir() || dir.join(INDEX_FILE).is_file()
}

/// Execute the `cache list` command.
fn execute_list(repo_dir: &Path, args: ListArgs) -> Result<()> {
    if !is_cache_dir(repo_dir) {
        if args.json {
            println!("[]");
        } else {
            println!("Cache directory does not exist: {}", repo_dir.display());
            println!("No cache entries found.");
        }
        return Ok(());
    }

    let entries = scan_registry(repo_dir)?;

    if entries.is_empty() {
        if args.json {
            println!("[]");
        } else {
            println!("No cache entries found in: {}", repo_dir.display());
        }
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        display_table(&entries);
    }
    Ok(())
}

/// Execute the `cache clean` command.
fn execute_clean(repo_dir: &Path, args: CleanArgs) -> Result<()> {
    if !repo_dir.exists() {
        println!("Cache directory does not exist: {}", repo_dir.display());
        println!("Nothing to clean.");
        return Ok(());
    }
    if !is_cache_dir(repo_dir) {
        bail!(
            "{} does not look like a texgit cache directory, refusing to delete it",
            repo_dir.display()
        );
    }

    let (size, file_count) = calculate_directory_info(repo_dir);
    println!(
        "Cache directory to be deleted: {} ({} files, {})",
        repo_dir.display(),
        file_count,
        format_size(size)
    );

    if args.dry_run {
        println!("\n🔎 Dry run mode - no changes were made.");
        return Ok(());
    }

    if !args.yes {
        print!("\nDo you want to delete the cache directory? (y/N): ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input != "y" && input != "yes" {
            println!("Clean cancelled.");
            return Ok(());
        }
    }

    fs::remove_dir_all(repo_dir)
        .with_context(|| format!("Failed to delete {}", repo_dir.display()))?;
    println!("✅ Deleted: {}", repo_dir.display());
    Ok(())
}

/// Reads all entries from the persisted index, so stale ones are skipped.
///
/// The index is only read. Listing never changes the cache directory.
fn scan_registry(repo_dir: &Path) -> Result<Vec<CacheEntry>> {
    let index = ResourceRegistry::read_index(repo_dir)
        .with_context(|| format!("Failed to read cache index in {}", repo_dir.display()))?;

    let mut entries = Vec::new();
    for (realm, names) in index {
        for (name, path) in names {
            let (size, file_count) = calculate_directory_info(&path);
            entries.push(CacheEntry {
                realm: realm.clone(),
                name,
                path,
                size,
                file_count,
            });
        }
    }
    Ok(entries)
}

/// Calculate total size and file count below `path`
fn calculate_directory_info(path: &Path) -> (u64, usize) {
    let mut total_size = 0u64;
    let mut file_count = 0usize;

    for entry in WalkDir::new(path).into_iter().flatten() {
        if let Ok(meta) = entry.metadata() {
            if meta.is_file() {
                total_size += meta.len();
                file_count += 1;
            }
        }
    }

    (total_size, file_count)
}

/// Display cache entries in table format
fn display_table(entries: &[CacheEntry]) {
    println!("Cache entries:\n");
    println!("{:<14} {:<32} {:>8} {:>12}", "REALM", "NAME", "FILES", "SIZE");
    println!("{}", "-".repeat(69));

    for entry in entries {
        println!(
            "{:<14} {:<32} {:>8} {:>12}",
            entry.realm,
            entry.name,
            entry.file_count,
            format_size(entry.size)
        );
    }

    let total_size: u64 = entries.iter().map(|e| e.size).sum();
    println!(
        "\nTotal: {} entries ({})",
        entries.len(),
        format_size(total_size)
    );
}

/// Format size in human-readable format
fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
