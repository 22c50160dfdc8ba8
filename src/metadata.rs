//! # Build-Metadata Runner
//!
//! Documents ask for resources by writing request lines into their build
//! metadata file (the LaTeX `.aux` file). [`run`] resolves every request
//! through a [`ProcessCache`] and appends response lines that define the
//! resulting paths and URLs as macros for the next compilation pass.
//!
//! ## Requests
//!
//! ```text
//! \@texgit@gitFile{name}{repository url}{path in repository}{optional command}
//! \@texgit@argFile{name}{optional prefix}{optional suffix}
//! \@texgit@process{name}{optional repository url}{optional directory}{command}
//! ```
//!
//! Each brace group holds whitespace-separated tokens. Inside a group,
//! `\\`, `\{`, `\}`, `{{`, and `}}` stand for the literal characters and
//! `\ ` is a space that does not split tokens. An empty group means the
//! value is absent.
//!
//! ## Responses
//!
//! For a request named `NAME` the runner appends
//! `\expandafter\xdef\csname @texgit@path@NAME\endcsname{PATH}%` with `PATH`
//! relative to the metadata file's directory, plus the basename (`name`,
//! `escName`) and URL (`url`) where applicable. Lines starting with
//! `\@texgit@needsTexgitPass` are removed.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::exec::ExecEnvironment;
use crate::process::ProcessCache;

/// Header of a request for a (possibly post-processed) repository file.
pub const REQUEST_GIT_FILE: &str = r"\@texgit@gitFile";
/// Header of a request for an argument file.
pub const REQUEST_ARG_FILE: &str = r"\@texgit@argFile";
/// Header of a request for the output of a command.
pub const REQUEST_PROCESS: &str = r"\@texgit@process";
/// Lines starting with this marker are deleted.
pub const FORBIDDEN_LINE: &str = r"\@texgit@needsTexgitPass";

pub const RESPONSE_PATH: &str = "@texgit@path@";
pub const RESPONSE_NAME: &str = "@texgit@name@";
pub const RESPONSE_ESCAPED_NAME: &str = "@texgit@escName@";
pub const RESPONSE_URL: &str = "@texgit@url@";

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GitFile {
        name: String,
        url: String,
        path: String,
        command: Vec<String>,
    },
    ArgFile {
        name: String,
        prefix: Option<String>,
        suffix: Option<String>,
    },
    Process {
        name: String,
        url: Option<String>,
        dir: Option<String>,
        command: Vec<String>,
    },
}

impl Request {
    pub fn name(&self) -> &str {
        match self {
            Request::GitFile { name, .. }
            | Request::ArgFile { name, .. }
            | Request::Process { name, .. } => name,
        }
    }
}

fn invalid(line: &str, message: impl Into<String>) -> Error {
    Error::InvalidRequest {
        line: line.to_string(),
        message: message.into(),
    }
}

/// Splits the brace groups following a request header into tokens.
fn parse_groups(line: &str, rest: &str) -> Result<Vec<Vec<String>>> {
    let mut groups = Vec::new();
    let mut chars = rest.chars().peekable();
    loop {
        match chars.next() {
            None => break,
            Some(c) if c.is_whitespace() => continue,
            Some('{') => {}
            Some(c) => {
                return Err(invalid(
                    line,
                    format!("expected '{{' but found {:?}", c),
                ))
            }
        }

        let mut tokens = Vec::new();
        let mut token = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.peek() {
                    Some(&next @ ('\\' | '{' | '}' | ' ')) => {
                        token.push(next);
                        chars.next();
                    }
                    _ => token.push('\\'),
                },
                '{' => {
                    if chars.peek() == Some(&'{') {
                        chars.next();
                    }
                    token.push('{');
                }
                '}' => {
                    if chars.peek() == Some(&'}') {
                        chars.next();
                        token.push('}');
                    } else {
                        closed = true;
                        break;
                    }
                }
                c if c.is_whitespace() => {
                    if !token.is_empty() {
                        tokens.push(std::mem::take(&mut token));
                    }
                }
                c => token.push(c),
            }
        }
        if !closed {
            return Err(invalid(line, "found '{' but no matching '}'"));
        }
        if !token.is_empty() {
            tokens.push(token);
        }
        groups.push(tokens);
    }
    Ok(groups)
}

/// The single value of a group, `None` for an empty group.
fn single(line: &str, group: &[String], what: &str) -> Result<Option<String>> {
    match group {
        [] => Ok(None),
        [value] => Ok(Some(value.clone())),
        _ => Err(invalid(
            line,
            format!("{} must be a single token, but got {:?}", what, group),
        )),
    }
}

fn required(line: &str, group: &[String], what: &str) -> Result<String> {
    single(line, group, what)?.ok_or_else(|| invalid(line, format!("missing {}", what)))
}

/// Parses one line of the metadata file.
///
/// Returns `Ok(None)` for lines that are not requests.
pub fn parse_request(line: &str) -> Result<Option<Request>> {
    let trimmed = line.trim();
    let Some((header, rest)) = [REQUEST_GIT_FILE, REQUEST_ARG_FILE, REQUEST_PROCESS]
        .into_iter()
        .find_map(|h| trimmed.strip_prefix(h).map(|rest| (h, rest)))
    else {
        return Ok(None);
    };
    if !rest.trim_start().starts_with('{') {
        return Err(invalid(line, format!("{} must be followed by '{{'", header)));
    }

    let groups = parse_groups(line, rest)?;
    if groups.len() < 3 {
        return Err(invalid(
            line,
            format!("expected at least 3 groups, but found {}", groups.len()),
        ));
    }
    let command: Vec<String> = groups[3..].iter().flatten().cloned().collect();

    let request = match header {
        REQUEST_GIT_FILE => Request::GitFile {
            name: required(line, &groups[0], "name")?,
            url: required(line, &groups[1], "repository url")?,
            path: required(line, &groups[2], "path")?,
            command,
        },
        REQUEST_ARG_FILE => {
            if groups.len() > 3 {
                return Err(invalid(line, "argument files take name, prefix, and suffix only"));
            }
            Request::ArgFile {
                name: required(line, &groups[0], "name")?,
                prefix: single(line, &groups[1], "prefix")?,
                suffix: single(line, &groups[2], "suffix")?,
            }
        }
        _ => {
            if command.is_empty() {
                return Err(invalid(line, "missing command"));
            }
            Request::Process {
                name: required(line, &groups[0], "name")?,
                url: single(line, &groups[1], "repository url")?,
                dir: single(line, &groups[2], "directory")?,
                command,
            }
        }
    };
    Ok(Some(request))
}

/// Formats one macro definition.
pub fn make_response(key: &str, name: &str, value: &str, xdef: bool) -> String {
    format!(
        r"\expandafter\{}\csname {}{}\endcsname{{{}}}%",
        if xdef { "xdef" } else { "gdef" },
        key,
        name.trim(),
        value
    )
}

/// Escapes a file name for typesetting.
pub fn escape_name(name: &str) -> String {
    name.replace('$', r"\$")
        .replace('_', r"\_")
        .replace(' ', "~")
}

/// `path` relative to `base_dir`, `/`-separated.
///
/// Paths outside `base_dir` are returned absolute.
fn relative_path(path: &Path, base_dir: &Path) -> String {
    match path.strip_prefix(base_dir) {
        Ok(relative) => relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => {
            debug!(
                "{} is outside {}, using the absolute path",
                path.display(),
                base_dir.display()
            );
            path.to_string_lossy().replace('\\', "/")
        }
    }
}

fn path_responses(name: &str, path: &Path, base_dir: &Path, basename: Option<&str>) -> Vec<String> {
    let mut responses = vec![make_response(
        RESPONSE_PATH,
        name,
        &relative_path(path, base_dir),
        true,
    )];
    if let Some(basename) = basename {
        responses.push(make_response(RESPONSE_NAME, name, basename, true));
        // must stay \gdef, \xdef would expand the escapes
        responses.push(make_response(
            RESPONSE_ESCAPED_NAME,
            name,
            &escape_name(basename),
            false,
        ));
    }
    responses
}

/// Resolves `request` and returns its response lines.
pub fn resolve(request: &Request, cache: &mut ProcessCache, base_dir: &Path) -> Result<Vec<String>> {
    match request {
        Request::GitFile {
            name,
            url,
            path,
            command,
        } => {
            let command = (!command.is_empty()).then_some(command.as_slice());
            let file = cache.get_git_file(url, path, Some(name), command)?;
            let mut responses =
                path_responses(name, &file.path, base_dir, Some(&file.basename));
            if !file.url.is_empty() {
                responses.push(make_response(RESPONSE_URL, name, &file.url, true));
            }
            Ok(responses)
        }
        Request::ArgFile {
            name,
            prefix,
            suffix,
        } => {
            let path = cache
                .get_argument_file(name, prefix.as_deref(), suffix.as_deref())?
                .into_path();
            let basename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(path_responses(name, &path, base_dir, Some(&basename)))
        }
        Request::Process {
            name,
            url,
            dir,
            command,
        } => {
            let path = cache.get_output(name, command, url.as_deref(), dir.as_deref())?;
            Ok(path_responses(name, &path, base_dir, None))
        }
    }
}

/// Counts of what a run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub resolved: usize,
    pub deleted: usize,
    pub appended: usize,
}

/// Finds the metadata file, trying `<arg>.aux` if `arg` itself is not a file.
pub fn locate(arg: &Path) -> Result<PathBuf> {
    if arg.is_file() {
        return Ok(arg.to_path_buf());
    }
    let mut with_extension = arg.as_os_str().to_owned();
    with_extension.push(".aux");
    let with_extension = PathBuf::from(with_extension);
    if with_extension.is_file() {
        return Ok(with_extension);
    }
    Err(Error::UnexpectedKind {
        path: arg.to_path_buf(),
        expected: "a metadata file (with or without .aux extension)",
    })
}

/// Processes the metadata file `aux`, caching into `repo_dir` (relative to
/// the file's directory unless absolute).
pub fn run(aux: &Path, repo_dir: &Path, environment: &ExecEnvironment) -> Result<RunSummary> {
    run_with(aux, |base_dir| {
        ProcessCache::open(base_dir.join(repo_dir), environment.clone())
    })
}

/// Like [`run`], but creates the process cache with `open`, which receives
/// the metadata file's directory.
pub fn run_with<F>(aux: &Path, open: F) -> Result<RunSummary>
where
    F: FnOnce(&Path) -> Result<ProcessCache>,
{
    let aux = locate(aux)?;
    info!("Using metadata file {}", aux.display());
    let content = fs::read_to_string(&aux)?;
    if content.trim().is_empty() {
        info!("{} is empty, nothing to do", aux.display());
        return Ok(RunSummary::default());
    }
    let base_dir = fs::canonicalize(match aux.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    })?;
    debug!("The base directory is {}", base_dir.display());

    let lines: Vec<&str> = content.lines().collect();
    info!("Loaded {} lines from {}", lines.len(), aux.display());

    let mut cache: Option<ProcessCache> = None;
    let mut open = Some(open);
    let mut kept: Vec<String> = Vec::with_capacity(lines.len());
    let mut responses: Vec<String> = Vec::new();
    let mut summary = RunSummary::default();

    let outcome = (|| -> Result<()> {
        for line in &lines {
            let stripped = line.trim();
            if stripped.starts_with(FORBIDDEN_LINE) {
                summary.deleted += 1;
                continue;
            }
            kept.push(line.to_string());
            let Some(request) = parse_request(line)? else {
                continue;
            };
            if cache.is_none() {
                if let Some(open) = open.take() {
                    cache = Some(open(&base_dir)?);
                }
            }
            let Some(cache) = cache.as_mut() else {
                return Err(Error::AlreadyClosed {
                    what: "process cache".to_string(),
                });
            };
            debug!("Resolving {:?}", request);
            responses.extend(resolve(&request, cache, &base_dir)?);
            summary.resolved += 1;
        }
        Ok(())
    })();

    let closed = match cache.as_mut() {
        Some(cache) => cache.close(),
        None => Ok(()),
    };
    outcome?;
    closed?;

    if summary.resolved == 0 && summary.deleted == 0 {
        info!("No requests or deletion markers found, nothing to do");
        return Ok(summary);
    }
    info!("Resolved {} request(s)", summary.resolved);

    for response in responses {
        let response = response.trim();
        if response.is_empty() || lines.iter().any(|l| l.trim() == response) {
            continue;
        }
        if kept.iter().any(|l| l.trim() == response) {
            continue;
        }
        kept.push(response.to_string());
        summary.appended += 1;
    }

    let mut text = kept.join("\n");
    text.push('\n');
    let mut tmp = NamedTempFile::new_in(&base_dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.persist(&aux).map_err(|e| Error::Io(e.error))?;
    info!(
        "Wrote {} lines to {} ({} appended, {} deleted)",
        kept.len(),
        aux.display(),
        summary.appended,
        summary.deleted
    );
    Ok(summary)
}
