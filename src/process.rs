//! # Process & Output Cache
//!
//! The `ProcessCache` runs commands once and keeps their output. A command
//! is identified by the name the caller gives it: the first request for
//! `("output", name)` executes the command and stores its sanitized stdout,
//! every later request for the same name returns the stored file without
//! running anything, even if the command differs.
//!
//! Files taken from repositories can be post-processed the same way. Their
//! content is piped into a command and the result is cached in the
//! `postprocessed` realm, while the returned [`GitPath`] keeps pointing at
//! the original file's repository and permalink.
//!
//! Commands can reference other cache entries through argument tokens of
//! the form `(?name?)`, `(?name:prefix?)`, or `(?name:prefix:suffix?)`,
//! which are replaced by the path of the argument file `name`.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::exec::{self, ExecEnvironment, RunOptions};
use crate::registry::Claim;
use crate::repository::{GitPath, RepositoryResolver};
use crate::sanitize;

/// Realm of cached command output.
pub const OUTPUT_REALM: &str = "output";

/// Realm of post-processed repository files.
pub const POSTPROCESSED_REALM: &str = "postprocessed";

/// Realm of argument files referenced by `(?name?)` tokens.
pub const ARGS_REALM: &str = "args";

/// Trims `value` and maps blank strings to `None`.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parses an argument-file reference into `(name, prefix, suffix)`.
///
/// Returns `Ok(None)` when `token` is not wrapped in `(?` and `?)`.
pub fn parse_argument_reference(
    token: &str,
) -> Result<Option<(&str, Option<&str>, Option<&str>)>> {
    let Some(inner) = token
        .strip_prefix("(?")
        .and_then(|rest| rest.strip_suffix("?)"))
    else {
        return Ok(None);
    };
    let parts: Vec<&str> = inner.split(':').collect();
    if parts.len() > 3 {
        return Err(Error::InvalidArgument {
            message: format!(
                "argument reference {:?} has {} parts, at most name:prefix:suffix allowed",
                token,
                parts.len()
            ),
        });
    }
    let name = parts[0].trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument {
            message: format!("invalid name in argument reference {:?}", token),
        });
    }
    Ok(Some((
        name,
        non_blank(parts.get(1).copied()),
        non_blank(parts.get(2).copied()),
    )))
}

/// Writes `text` with trailing whitespace removed from every line and from
/// the text as a whole. Non-empty text ends with exactly one newline.
fn write_artifact(text: &str, dest: &Path) -> Result<()> {
    let mut content = String::with_capacity(text.len());
    for line in text.trim_end().lines() {
        content.push_str(line.trim_end());
        content.push('\n');
    }
    fs::write(dest, &content)?;
    debug!(
        "Wrote {} of originally {} characters to {}",
        content.len(),
        text.len(),
        dest.display()
    );
    Ok(())
}

/// Executes commands and caches their output on top of a [`RepositoryResolver`].
pub struct ProcessCache {
    resolver: RepositoryResolver,
    environment: ExecEnvironment,
}

impl ProcessCache {
    /// Opens a process cache in `base_dir` using the system `git`.
    pub fn open(base_dir: impl AsRef<Path>, environment: ExecEnvironment) -> Result<Self> {
        Ok(Self::with_resolver(
            RepositoryResolver::open(base_dir)?,
            environment,
        ))
    }

    pub fn with_resolver(resolver: RepositoryResolver, environment: ExecEnvironment) -> Self {
        Self {
            resolver,
            environment,
        }
    }

    pub fn resolver(&self) -> &RepositoryResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut RepositoryResolver {
        &mut self.resolver
    }

    /// Gets the argument file `name`, creating an empty file on first use.
    pub fn get_argument_file(
        &mut self,
        name: &str,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<Claim> {
        self.resolver.registry_mut().get_file(
            ARGS_REALM,
            name,
            non_blank(prefix),
            non_blank(suffix),
        )
    }

    /// Rewrites an argument-file reference to the file's path.
    ///
    /// Other tokens are returned trimmed; blank tokens yield `None`.
    pub fn filter_argument(&mut self, token: &str) -> Result<Option<String>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        match parse_argument_reference(token)? {
            Some((name, prefix, suffix)) => {
                let claim = self.get_argument_file(name, prefix, suffix)?;
                Ok(Some(claim.path().to_string_lossy().into_owned()))
            }
            None => Ok(Some(token.to_string())),
        }
    }

    /// Gets the output of `command` stored under `name`.
    ///
    /// The command only runs if nothing is stored under `name` yet. If
    /// `repo_url` and `relative_dir` are given, it runs inside that
    /// directory of the repository.
    pub fn get_output(
        &mut self,
        name: &str,
        command: &[String],
        repo_url: Option<&str>,
        relative_dir: Option<&str>,
    ) -> Result<PathBuf> {
        let dest = match self
            .resolver
            .registry_mut()
            .get_file(OUTPUT_REALM, name, None, None)?
        {
            Claim::Existing(path) => {
                debug!("Using cached output {} at {}", name, path.display());
                return Ok(path);
            }
            Claim::Created(path) => path,
        };

        let result = self.produce_output(&dest, command, repo_url, relative_dir);
        self.settle(OUTPUT_REALM, name, result)?;
        Ok(dest)
    }

    fn produce_output(
        &mut self,
        dest: &Path,
        command: &[String],
        repo_url: Option<&str>,
        relative_dir: Option<&str>,
    ) -> Result<()> {
        let working_dir = match (non_blank(repo_url), non_blank(relative_dir)) {
            (Some(url), Some(dir)) => Some(self.resolver.get_dir(url, dir)?.path),
            (None, None) => None,
            (url, dir) => {
                return Err(Error::InvalidArgument {
                    message: format!(
                        "repository url and relative directory must both be given or both be absent, but got {:?} and {:?}",
                        url, dir
                    ),
                })
            }
        };
        self.execute(dest, command, working_dir.as_deref(), None)
    }

    /// Gets a file from a repository, optionally post-processed.
    ///
    /// With a `command`, the file's content is piped through it and the
    /// output is cached under `name` in the `postprocessed` realm. The
    /// returned path then points at that output while basename, repository,
    /// and URL still describe the original file.
    pub fn get_git_file(
        &mut self,
        repo_url: &str,
        relative_path: &str,
        name: Option<&str>,
        command: Option<&[String]>,
    ) -> Result<GitPath> {
        let source = self.resolver.get_file(repo_url, relative_path)?;
        let Some(command) = command.filter(|c| c.iter().any(|t| !t.trim().is_empty())) else {
            return Ok(source);
        };
        let name = non_blank(name).ok_or_else(|| Error::InvalidArgument {
            message: format!(
                "post-processing {} requires a name",
                source.path.display()
            ),
        })?;

        let dest = match self
            .resolver
            .registry_mut()
            .get_file(POSTPROCESSED_REALM, name, None, None)?
        {
            Claim::Existing(path) => path,
            Claim::Created(path) => {
                let result = fs::read_to_string(&source.path)
                    .map_err(Error::from)
                    .and_then(|input| self.execute(&path, command, None, Some(&input)));
                self.settle(POSTPROCESSED_REALM, name, result)?;
                path
            }
        };
        Ok(GitPath { path: dest, ..source })
    }

    /// Discards the entry `(realm, name)` if producing it failed.
    fn settle(&mut self, realm: &str, name: &str, result: Result<()>) -> Result<()> {
        if let Err(e) = result {
            self.resolver.registry_mut().discard(realm, name)?;
            return Err(e);
        }
        Ok(())
    }

    fn execute(
        &mut self,
        dest: &Path,
        command: &[String],
        working_dir: Option<&Path>,
        stdin: Option<&str>,
    ) -> Result<()> {
        let mut tokens: Vec<String> = command
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tokens.is_empty() {
            return Err(Error::InvalidArgument {
                message: format!("invalid command {:?}", command),
            });
        }
        let mut filtered = Vec::with_capacity(tokens.len());
        filtered.push(tokens.remove(0));
        for token in tokens {
            if let Some(token) = self.filter_argument(&token)? {
                filtered.push(token);
            }
        }

        let (command, env) = self.environment.prepare(filtered);
        let mut options = RunOptions::new(self.environment.timeout).env(env);
        if let Some(dir) = working_dir {
            options = options.working_dir(dir);
        }
        if let Some(input) = stdin {
            options = options.stdin(input);
        }
        info!("Running {:?}", command.join(" "));
        let output = exec::run(&command, &options)?;

        let mut sensitive = self.resolver.sensitive_paths();
        sensitive.push(dest.to_path_buf());
        let text = sanitize::sanitize(&output.stdout, &sensitive)?;
        write_artifact(&text, dest)
    }

    /// Closes the resolver and its registry.
    pub fn close(&mut self) -> Result<()> {
        self.resolver.close()
    }
}
