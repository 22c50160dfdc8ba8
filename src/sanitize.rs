//! Removal of local absolute paths from captured command output.
//!
//! Programs run by texgit often print the paths they work on: temporary
//! files, clone directories, the artifact being written. Such paths differ
//! between machines and runs, so they are replaced by
//! [`BASE_PATH_REPLACEMENT`] before the output is stored.
//!
//! A path is only replaced when it is clearly delimited (by spaces, quotes,
//! brackets, commas, semicolons, or line boundaries) and when the part that
//! follows it either is empty or names something that exists below the base
//! path. Text that merely looks like a path is left alone.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use regex::{Captures, Regex};

use crate::defaults::BASE_PATH_REPLACEMENT;
use crate::error::Result;

/// Delimiter pairs matched literally.
const LITERAL_DELIMITERS: &[(&str, &str)] = &[
    (" ", " "),
    ("'", "'"),
    ("(", ")"),
    ("{", "}"),
    ("[", "]"),
    ("<", ">"),
    ("`", "`"),
    (",", " "),
    (",", ","),
    ("\"", "\""),
    (";", " "),
    (";", ";"),
    (" ", ". "),
];

/// Delimiter pairs involving line anchors, already in regex syntax.
const ANCHORED_DELIMITERS: &[(&str, &str)] = &[
    ("^", "$"),
    ("^", " "),
    (" ", "$"),
    ("^", ","),
    (",", "$"),
    ("^", ";"),
    (";", "$"),
    ("^", r"\. "),
    ("^", r"\.$"),
];

fn delimiters() -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = LITERAL_DELIMITERS
        .iter()
        .map(|(s, e)| (regex::escape(s), regex::escape(e)))
        .chain(
            ANCHORED_DELIMITERS
                .iter()
                .map(|(s, e)| (s.to_string(), e.to_string())),
        )
        .collect();
    pairs.sort();
    pairs
}

/// Whether `candidate` (the text following the base path) may be replaced.
fn is_replaceable(base: &Path, candidate: &str) -> bool {
    if candidate.is_empty() {
        return true;
    }
    // "/base" + "name" would be a sibling of the base, not something below it
    let Some(sub) = candidate.strip_prefix(MAIN_SEPARATOR) else {
        return false;
    };
    if sub.is_empty() {
        return true;
    }
    let sub = Path::new(sub);
    sub.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && base.join(sub).exists()
}

/// Replaces every delimited occurrence of `base_path` in `text`.
///
/// The delimiters and whatever follows the base path are preserved, only
/// the base path itself becomes [`BASE_PATH_REPLACEMENT`].
pub fn replace_base_path(text: &str, base_path: &Path) -> Result<String> {
    if text.is_empty() {
        return Ok(String::new());
    }
    let base = base_path.to_string_lossy();
    if base.is_empty() || !text.contains(base.as_ref()) {
        return Ok(text.to_string());
    }
    let escaped = regex::escape(&base);

    let mut result = text.to_string();
    for (start, end) in delimiters() {
        let pattern = Regex::new(&format!("(?m)({}){}(.*?)({})", start, escaped, end))?;
        result = pattern
            .replace_all(&result, |caps: &Captures<'_>| {
                let sub = &caps[2];
                if is_replaceable(base_path, sub) {
                    format!("{}{}{}{}", &caps[1], BASE_PATH_REPLACEMENT, sub, &caps[3])
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();
    }
    Ok(result)
}

/// Applies [`replace_base_path`] for every path in `base_paths`.
///
/// Longer paths go first, so a directory nested inside another sensitive
/// directory is replaced as a whole instead of leaving a partial tail.
pub fn sanitize(text: &str, base_paths: &[PathBuf]) -> Result<String> {
    let mut paths: Vec<&PathBuf> = base_paths.iter().collect();
    paths.sort_by(|a, b| {
        b.as_os_str()
            .len()
            .cmp(&a.as_os_str().len())
            .then_with(|| a.cmp(b))
    });
    paths.dedup();

    let mut result = text.to_string();
    for path in paths {
        result = replace_base_path(&result, path)?;
    }
    Ok(result)
}
