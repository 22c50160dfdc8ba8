//! Git repositories: URL canonicalization, repository identity, and the
//! `git` invocations used to clone and inspect working copies.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use log::debug;
use url::Url;

use crate::defaults::{CLONE_TIMEOUT, METADATA_TIMEOUT};
use crate::error::{Error, Result};
use crate::exec::{self, RunOptions};

/// Host whose repositories get commit-pinned `blob` permalinks.
pub const GITHUB_HOST: &str = "github.com";

/// Short host alias used in repository keys for GitHub.
pub const GITHUB_ALIAS: &str = "gh";

/// Host alias for URLs without a host, such as `file:///srv/repo`.
pub const LOCAL_ALIAS: &str = "local";

/// Rewrites scp-style `user@host:path` to `ssh://user@host/path`.
fn expand_scp(url: &str) -> String {
    if url.contains("://") {
        return url.to_string();
    }
    match url.split_once(':') {
        Some((authority, path)) if authority.contains('@') && !authority.contains('/') => {
            format!("ssh://{}/{}", authority, path.trim_start_matches('/'))
        }
        _ => url.to_string(),
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Ok(Url::parse(&expand_scp(url.trim()))?)
}

/// Strips surrounding slashes and any number of `.git` suffixes.
fn trim_repo_path(path: &str) -> &str {
    let mut path = path;
    loop {
        let trimmed = path.trim_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        if trimmed == path {
            return path;
        }
        path = trimmed;
    }
}

fn is_github(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case(GITHUB_HOST))
}

/// Normalizes a repository URL.
///
/// GitHub URLs in any spelling (http, https, ssh, scp-style, with or without
/// `.git` or trailing slash) become `https://github.com/<user>/<repo>`.
/// Other URLs keep scheme, user, host, and port, and lose credentials,
/// query, fragment, the `.git` suffix, and trailing slashes.
pub fn canonical_url(url: &str) -> Result<String> {
    let parsed = parse_url(url)?;
    let path = trim_repo_path(parsed.path());
    if is_github(&parsed) {
        return Ok(format!("https://{}/{}", GITHUB_HOST, path));
    }

    let mut canonical = format!("{}://", parsed.scheme());
    if !parsed.username().is_empty() {
        canonical.push_str(parsed.username());
        canonical.push('@');
    }
    if let Some(host) = parsed.host_str() {
        canonical.push_str(host);
    }
    if let Some(port) = parsed.port() {
        canonical.push_str(&format!(":{}", port));
    }
    canonical.push('/');
    canonical.push_str(path);
    Ok(canonical)
}

/// Identity of a remote repository, independent of how its URL is spelled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryKey {
    pub host: String,
    pub path: String,
}

/// Maps characters that may not appear in a registry name to `_`.
fn key_part(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl RepositoryKey {
    /// Derives the key of `url`.
    ///
    /// GitHub collapses to [`GITHUB_ALIAS`]. Other hosts keep their port, so
    /// two servers on one machine never share a clone.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = parse_url(url)?;
        let host = if is_github(&parsed) {
            GITHUB_ALIAS.to_string()
        } else {
            let host = match parsed.host_str() {
                Some(host) if !host.is_empty() => key_part(&host.to_ascii_lowercase()),
                _ => LOCAL_ALIAS.to_string(),
            };
            match parsed.port() {
                Some(port) => format!("{}_{}", host, port),
                None => host,
            }
        };
        let path = key_part(trim_repo_path(parsed.path()));
        Ok(Self { host, path })
    }

    /// The name under which the clone is registered in the `git` realm.
    pub fn registry_name(&self) -> String {
        format!("{}_{}", self.host, self.path)
    }
}

impl fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.path)
    }
}

/// HEAD of a local working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadInfo {
    pub commit: String,
    pub timestamp: DateTime<FixedOffset>,
}

fn validate_commit(commit: &str) -> Result<String> {
    let commit = commit.trim();
    if commit.len() != 40 || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidArgument {
            message: format!("invalid commit hash {:?}", commit),
        });
    }
    Ok(commit.to_ascii_lowercase())
}

/// Parses the output of `git log -1 --format=%H%n%cI`.
pub fn parse_head(output: &str) -> Result<HeadInfo> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let commit = validate_commit(lines.next().unwrap_or_default())?;
    let date = lines.next().ok_or_else(|| Error::InvalidArgument {
        message: format!("no commit date in {:?}", output),
    })?;
    let timestamp = DateTime::parse_from_rfc3339(date).map_err(|e| Error::InvalidArgument {
        message: format!("invalid commit date {:?}: {}", date, e),
    })?;
    Ok(HeadInfo { commit, timestamp })
}

/// An immutable record of a cloned repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepository {
    /// Root of the working copy.
    pub path: PathBuf,
    /// Canonical URL, see [`canonical_url`].
    pub url: String,
    /// Full 40-character commit hash of HEAD.
    pub commit: String,
    pub timestamp: DateTime<FixedOffset>,
}

impl GitRepository {
    pub fn new(path: PathBuf, url: &str, head: HeadInfo) -> Result<Self> {
        if !path.is_dir() {
            return Err(Error::UnexpectedKind {
                path,
                expected: "a directory",
            });
        }
        let repo = Self {
            url: canonical_url(url)?,
            commit: validate_commit(&head.commit)?,
            timestamp: head.timestamp,
            path,
        };
        debug!(
            "Found repository {} at {} with commit {} from {}",
            repo.url,
            repo.path.display(),
            repo.commit,
            repo.timestamp.to_rfc3339()
        );
        Ok(repo)
    }

    pub fn is_github(&self) -> bool {
        self.url.starts_with(&format!("https://{}/", GITHUB_HOST))
    }

    pub fn key(&self) -> Result<RepositoryKey> {
        RepositoryKey::from_url(&self.url)
    }

    /// Builds the web URL for `path`, which must exist inside the working
    /// copy.
    ///
    /// GitHub links are pinned to the commit
    /// (`<url>/blob/<commit>/<relative path>`); other hosts get the
    /// relative path appended to the repository URL.
    pub fn permalink(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.path).map_err(|_| Error::InvalidArgument {
            message: format!(
                "{} is not inside repository {}",
                path.display(),
                self.path.display()
            ),
        })?;
        if !(path.is_file() || path.is_dir()) {
            return Err(Error::UnexpectedKind {
                path: path.to_path_buf(),
                expected: "an existing file or directory",
            });
        }
        let relative: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let relative = relative.join("/");

        let mut link = self.url.clone();
        if self.is_github() {
            link.push_str("/blob/");
            link.push_str(&self.commit);
        }
        if !relative.is_empty() {
            link.push('/');
            link.push_str(&relative);
        }
        Ok(link)
    }

    /// The `user/name` part of the repository URL.
    pub fn name(&self) -> String {
        let mut parts = self.url.rsplitn(3, '/');
        match (parts.next(), parts.next()) {
            (Some(name), Some(user)) if !user.is_empty() && !user.ends_with(':') => {
                format!("{}/{}", user, name)
            }
            (Some(name), _) => name.to_string(),
            _ => self.url.clone(),
        }
    }
}

/// Locates the `git` executable.
pub fn git_binary() -> Result<PathBuf> {
    which::which("git").map_err(|e| Error::ToolValidation {
        tool: "git".to_string(),
        message: e.to_string(),
    })
}

fn git_command(repo_dir: &Path, args: &[&str]) -> Result<Vec<String>> {
    let mut command = vec![
        git_binary()?.to_string_lossy().into_owned(),
        "-C".to_string(),
        repo_dir.to_string_lossy().into_owned(),
    ];
    command.extend(args.iter().map(|a| a.to_string()));
    Ok(command)
}

/// Shallow-clones `url` into the existing, empty directory `target_dir`.
///
/// This uses the system git command, so SSH keys, credential helpers, and
/// anything configured in `~/.gitconfig` apply.
pub fn clone_shallow(url: &str, target_dir: &Path) -> Result<()> {
    let target = target_dir.to_string_lossy();
    let command = git_command(target_dir, &["clone", "--depth", "1", url, &target])?;
    exec::run(
        &command,
        &RunOptions::new(CLONE_TIMEOUT).working_dir(target_dir),
    )?;
    Ok(())
}

/// Reads commit hash and commit date of HEAD in `repo_dir`.
pub fn read_head(repo_dir: &Path) -> Result<HeadInfo> {
    let command = git_command(
        repo_dir,
        &["log", "--no-abbrev-commit", "-1", "--format=%H%n%cI"],
    )?;
    let output = exec::run(
        &command,
        &RunOptions::new(METADATA_TIMEOUT).working_dir(repo_dir),
    )?;
    parse_head(&output.stdout)
}

/// Reads `remote.origin.url` of `repo_dir`.
pub fn read_remote_url(repo_dir: &Path) -> Result<String> {
    let command = git_command(repo_dir, &["config", "--get", "remote.origin.url"])?;
    let output = exec::run(
        &command,
        &RunOptions::new(METADATA_TIMEOUT).working_dir(repo_dir),
    )?;
    let url = output
        .stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| Error::InconsistentState {
            message: format!("no origin url configured in {}", repo_dir.display()),
        })?;
    let url = match url.strip_suffix("/.git") {
        Some(stripped) => format!("{}.git", stripped),
        None => url.trim_end_matches('/').to_string(),
    };
    Ok(url)
}
