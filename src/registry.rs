//! # Resource Registry
//!
//! The registry assigns stable filesystem paths to two-level keys. A key is a
//! `(realm, name)` pair: the realm is a namespace backed by its own directory
//! under `<base>/realms/`, and inside a realm each name maps to exactly one
//! file or directory.
//!
//! ## Guarantees
//!
//! - The same key always maps to the same path for the lifetime of the
//!   backing directory, and no two keys ever share a path.
//! - The kind of an entry (file or directory) is fixed when it is first
//!   claimed and enforced on every later lookup.
//! - Paths are created lazily. The registry first tries a deterministic
//!   filename derived from the name (or the caller's prefix) plus the
//!   optional suffix, and falls back to a randomized unique name when that
//!   filename is already taken on disk.
//!
//! ## Persistence
//!
//! `close` writes the `realm -> name -> filename` table to `.cache.json` in
//! the base directory, exactly once. `open` reads it back and silently drops
//! every entry whose target no longer exists, so a cache that was partly
//! deleted by hand, or that outlived a crashed run, heals itself instead of
//! failing.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};
use tempfile::{Builder, NamedTempFile};

use crate::defaults::{INDEX_FILE, REALMS_DIR};
use crate::error::{Error, Result};

/// Characters that survive into on-disk filenames.
fn is_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_')
}

/// Characters allowed in entry names.
fn is_name_char(c: char) -> bool {
    is_filename_char(c) || matches!(c, ':' | '.' | '@' | '/')
}

/// Characters allowed in filename prefixes and suffixes.
fn is_affix_char(c: char) -> bool {
    is_filename_char(c) || c == '.'
}

fn make_key(value: &str, allowed: fn(char) -> bool) -> Result<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidKey {
            value: value.to_string(),
            message: "non-empty string expected, but got empty or whitespace-only string"
                .to_string(),
        });
    }
    if let Some(c) = trimmed.chars().find(|c| !allowed(*c)) {
        return Err(Error::InvalidKey {
            value: value.to_string(),
            message: format!("contains forbidden character {:?}", c),
        });
    }
    Ok(trimmed)
}

/// Validates a realm and returns it trimmed.
///
/// Realms become directory names, so only alphanumerics and `+ - _` are
/// accepted.
pub fn validate_realm(realm: &str) -> Result<&str> {
    make_key(realm, is_filename_char)
}

/// Validates an entry name and returns it trimmed.
///
/// Names additionally accept `: . @ /`; they never reach the filesystem
/// verbatim.
pub fn validate_name(name: &str) -> Result<&str> {
    make_key(name, is_name_char)
}

fn validate_affix(affix: Option<&str>) -> Result<Option<&str>> {
    affix.map(|a| make_key(a, is_affix_char)).transpose()
}

/// Creates the `.gitignore` and `.nojekyll` markers in `dir`.
fn make_ignore(dir: &Path) -> Result<()> {
    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, "*\n**/*")?;
    }
    let nojekyll = dir.join(".nojekyll");
    if !nojekyll.exists() {
        fs::write(&nojekyll, "")?;
    }
    Ok(())
}

/// Whether a registry entry is a regular file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    fn matches(self, path: &Path) -> bool {
        match self {
            EntryKind::File => path.is_file(),
            EntryKind::Dir => path.is_dir(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            EntryKind::File => "a file",
            EntryKind::Dir => "a directory",
        }
    }
}

/// The outcome of claiming a registry entry.
///
/// `Created` means the path was generated by this call and the caller is
/// responsible for populating it. `Existing` means a previously claimed path
/// is being handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Created(PathBuf),
    Existing(PathBuf),
}

impl Claim {
    pub fn path(&self) -> &Path {
        match self {
            Claim::Created(path) | Claim::Existing(path) => path,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            Claim::Created(path) | Claim::Existing(path) => path,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Claim::Created(_))
    }
}

#[derive(Debug)]
struct Realm {
    dir: PathBuf,
    entries: BTreeMap<String, PathBuf>,
}

/// A persistent `(realm, name) -> path` store rooted in one base directory.
#[derive(Debug)]
pub struct ResourceRegistry {
    base_dir: PathBuf,
    realms_dir: PathBuf,
    index_file: PathBuf,
    realms: BTreeMap<String, Realm>,
    open: bool,
}

impl ResourceRegistry {
    /// Opens (and if needed creates) a registry in `base_dir`, restoring the
    /// entries recorded by the last `close`.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        fs::create_dir_all(base_dir)?;
        let base_dir = fs::canonicalize(base_dir)?;
        make_ignore(&base_dir)?;

        let realms_dir = base_dir.join(REALMS_DIR);
        fs::create_dir_all(&realms_dir)?;
        make_ignore(&realms_dir)?;

        let index_file = base_dir.join(INDEX_FILE);
        let realms: BTreeMap<String, Realm> = Self::read_index(&base_dir)?
            .into_iter()
            .map(|(realm, entries)| {
                let dir = realms_dir.join(&realm);
                (realm, Realm { dir, entries })
            })
            .collect();

        debug!(
            "Opened registry in {} with {} realm(s)",
            base_dir.display(),
            realms.len()
        );
        Ok(Self {
            base_dir,
            realms_dir,
            index_file,
            realms,
            open: true,
        })
    }

    /// Reads the index persisted in `base_dir` without opening the registry.
    ///
    /// Nothing on disk is created or changed. Entries with an invalid key or
    /// a missing target are skipped, and realms left without entries are
    /// omitted. A directory without an index yields an empty table.
    pub fn read_index(
        base_dir: impl AsRef<Path>,
    ) -> Result<BTreeMap<String, BTreeMap<String, PathBuf>>> {
        let base_dir = base_dir.as_ref();
        let index_file = base_dir.join(INDEX_FILE);
        let mut realms = BTreeMap::new();
        if !index_file.exists() {
            return Ok(realms);
        }
        if !index_file.is_file() {
            return Err(Error::UnexpectedKind {
                path: index_file,
                expected: "a file",
            });
        }

        let index: BTreeMap<String, BTreeMap<String, String>> =
            serde_json::from_str(&fs::read_to_string(&index_file)?)?;
        let realms_dir = base_dir.join(REALMS_DIR);
        for (realm, names) in index {
            let realm = match validate_realm(&realm) {
                Ok(realm) => realm.to_string(),
                Err(e) => {
                    warn!("Ignoring realm from index: {}", e);
                    continue;
                }
            };
            let dir = realms_dir.join(&realm);
            let mut entries = BTreeMap::new();
            for (name, file_name) in names {
                let Ok(name) = validate_name(&name) else {
                    warn!("Ignoring invalid name {:?} in realm {:?}", name, realm);
                    continue;
                };
                if !is_single_component(&file_name) {
                    warn!(
                        "Ignoring entry {:?} in realm {:?}: bad path {:?}",
                        name, realm, file_name
                    );
                    continue;
                }
                let path = dir.join(&file_name);
                if path.is_file() || path.is_dir() {
                    entries.insert(name.to_string(), path);
                } else {
                    debug!(
                        "Dropping stale entry {}/{}: {} no longer exists",
                        realm,
                        name,
                        path.display()
                    );
                }
            }
            if !entries.is_empty() {
                realms.insert(realm, entries);
            }
        }
        Ok(realms)
    }

    /// The canonical base directory of this registry.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::AlreadyClosed {
                what: format!("resource registry in {}", self.base_dir.display()),
            })
        }
    }

    /// Gets the file for `(realm, name)`, creating it on first use.
    ///
    /// `prefix` replaces the name-derived stem of a newly generated filename
    /// and `suffix` is appended to it. For an existing entry they must agree
    /// with its filename, otherwise the lookup fails with `InvalidArgument`.
    pub fn get_file(
        &mut self,
        realm: &str,
        name: &str,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<Claim> {
        self.get(realm, name, EntryKind::File, prefix, suffix)
    }

    /// Gets the directory for `(realm, name)`, creating it on first use.
    pub fn get_dir(&mut self, realm: &str, name: &str) -> Result<Claim> {
        self.get(realm, name, EntryKind::Dir, None, None)
    }

    fn get(
        &mut self,
        realm: &str,
        name: &str,
        kind: EntryKind,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<Claim> {
        self.check_open()?;
        let realm = validate_realm(realm)?;
        let name = validate_name(name)?;
        let prefix = validate_affix(prefix)?;
        let suffix = validate_affix(suffix)?;

        if !self.realms.contains_key(realm) {
            let dir = self.realms_dir.join(realm);
            fs::create_dir_all(&dir)?;
            make_ignore(&dir)?;
            self.realms.insert(
                realm.to_string(),
                Realm {
                    dir,
                    entries: BTreeMap::new(),
                },
            );
        }
        let Some(entry) = self.realms.get_mut(realm) else {
            return Err(Error::InconsistentState {
                message: format!("realm {:?} vanished while claiming {:?}", realm, name),
            });
        };

        let claim = match entry.entries.get(name) {
            Some(path) => {
                check_affixes(realm, name, path, prefix, suffix)?;
                Claim::Existing(path.clone())
            }
            None => {
                let path = create_path(&entry.dir, name, kind, prefix, suffix)?;
                debug!("Claimed {}/{} -> {}", realm, name, path.display());
                entry.entries.insert(name.to_string(), path.clone());
                Claim::Created(path)
            }
        };

        if !kind.matches(claim.path()) {
            return Err(Error::UnexpectedKind {
                path: claim.into_path(),
                expected: kind.describe(),
            });
        }
        Ok(claim)
    }

    /// Lists the paths registered in `realm`, filtered by kind.
    pub fn list_realm(&self, realm: &str, files: bool, dirs: bool) -> Result<BTreeSet<PathBuf>> {
        let realm = validate_realm(realm)?;
        Ok(self
            .realms
            .get(realm)
            .map(|r| {
                r.entries
                    .values()
                    .filter(|p| (files && p.is_file()) || (dirs && p.is_dir()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// The `(name, path)` pairs of `realm`, sorted by name.
    pub fn entries(&self, realm: &str) -> Vec<(String, PathBuf)> {
        self.realms
            .get(realm)
            .map(|r| {
                r.entries
                    .iter()
                    .map(|(n, p)| (n.clone(), p.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes the entry `(realm, name)` together with its file or directory.
    ///
    /// Used to roll back a claim whose population failed, so that a later
    /// call starts from scratch instead of finding an empty artifact.
    pub fn discard(&mut self, realm: &str, name: &str) -> Result<()> {
        self.check_open()?;
        let realm = validate_realm(realm)?;
        let name = validate_name(name)?;
        let Some(path) = self
            .realms
            .get_mut(realm)
            .and_then(|r| r.entries.remove(name))
        else {
            return Ok(());
        };
        debug!("Discarding {}/{} at {}", realm, name, path.display());
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Absolute paths owned by this registry that must not leak into
    /// captured output.
    pub fn sensitive_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![
            self.base_dir.clone(),
            self.realms_dir.clone(),
            self.index_file.clone(),
        ];
        paths.extend(self.realms.values().map(|r| r.dir.clone()));
        paths
    }

    /// Closes the registry and persists the index.
    ///
    /// Realm directories without entries are removed. Closing twice is a
    /// no-op; every other operation fails with `AlreadyClosed` afterwards.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let empty: Vec<String> = self
            .realms
            .iter()
            .filter(|(_, r)| r.entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        for name in empty {
            if let Some(realm) = self.realms.remove(&name) {
                remove_empty_realm_dir(&realm.dir)?;
            }
        }

        if self.realms.is_empty() {
            match fs::remove_file(&self.index_file) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
            debug!("Closed empty registry in {}", self.base_dir.display());
            return Ok(());
        }

        let mut index: BTreeMap<&str, BTreeMap<&str, String>> = BTreeMap::new();
        for (realm_name, realm) in &self.realms {
            let names = index.entry(realm_name.as_str()).or_default();
            for (name, path) in &realm.entries {
                let relative = path.strip_prefix(&realm.dir).map_err(|_| {
                    Error::InconsistentState {
                        message: format!(
                            "{} is outside realm directory {}",
                            path.display(),
                            realm.dir.display()
                        ),
                    }
                })?;
                names.insert(name.as_str(), relative.to_string_lossy().into_owned());
            }
        }

        let mut tmp = NamedTempFile::new_in(&self.base_dir)?;
        tmp.write_all(serde_json::to_string(&index)?.as_bytes())?;
        tmp.persist(&self.index_file).map_err(|e| Error::Io(e.error))?;
        debug!(
            "Wrote index of {} realm(s) to {}",
            index.len(),
            self.index_file.display()
        );
        Ok(())
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.close() {
                warn!(
                    "Failed to close registry in {}: {}",
                    self.base_dir.display(),
                    e
                );
            }
        }
    }
}

/// Rejects a prefix or suffix that the existing entry's filename does not carry.
fn check_affixes(
    realm: &str,
    name: &str,
    path: &Path,
    prefix: Option<&str>,
    suffix: Option<&str>,
) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix_ok = prefix.is_none_or(|p| file_name.starts_with(p));
    let suffix_ok = suffix.is_none_or(|s| file_name.ends_with(s));
    if prefix_ok && suffix_ok {
        return Ok(());
    }
    Err(Error::InvalidArgument {
        message: format!(
            "{}/{} already exists as {:?}, which does not match prefix {:?} and suffix {:?}",
            realm, name, file_name, prefix, suffix
        ),
    })
}

fn is_single_component(file_name: &str) -> bool {
    let mut components = Path::new(file_name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Creates a fresh file or directory for `name` inside `dir`.
fn create_path(
    dir: &Path,
    name: &str,
    kind: EntryKind,
    prefix: Option<&str>,
    suffix: Option<&str>,
) -> Result<PathBuf> {
    let root: String = match prefix {
        Some(prefix) => prefix.to_string(),
        None => name.chars().filter(|c| is_filename_char(*c)).collect(),
    };
    let suffix = suffix.unwrap_or("");
    let file_name = format!("{}{}", root, suffix);

    if !file_name.is_empty() {
        let candidate = dir.join(&file_name);
        if fs::symlink_metadata(&candidate).is_err() {
            let created = match kind {
                EntryKind::File => OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&candidate)
                    .map(drop),
                EntryKind::Dir => fs::create_dir(&candidate),
            };
            match created {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    let mut builder = Builder::new();
    builder.prefix(&root).suffix(suffix).rand_bytes(8);
    let path = match kind {
        EntryKind::File => {
            let (_, path) = builder
                .tempfile_in(dir)?
                .keep()
                .map_err(|e| Error::Io(e.error))?;
            path
        }
        EntryKind::Dir => builder.tempdir_in(dir)?.keep(),
    };
    debug!(
        "{} was taken, using randomized {}",
        dir.join(&file_name).display(),
        path.display()
    );
    Ok(path)
}

/// Deletes a realm directory that holds nothing but the ignore markers.
fn remove_empty_realm_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name != ".gitignore" && name != ".nojekyll" {
            return Ok(());
        }
    }
    fs::remove_dir_all(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn claimed(claim: Result<Claim>) -> PathBuf {
        claim.unwrap().into_path()
    }

    fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    #[test]
    fn test_validate_keys() {
        assert_eq!(validate_realm(" git ").unwrap(), "git");
        assert!(validate_realm("").is_err());
        assert!(validate_realm("   ").is_err());
        assert!(validate_realm("a b").is_err());
        assert!(validate_realm("a.b").is_err());
        assert_eq!(validate_name("lst:test").unwrap(), "lst:test");
        assert_eq!(validate_name("x@y/z.w").unwrap(), "x@y/z.w");
        assert!(matches!(
            validate_name("a,b"),
            Err(Error::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_get_file_is_stable_within_session() {
        let temp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::open(temp.path()).unwrap();

        let first = registry.get_file("A", "test", None, None).unwrap();
        assert!(first.is_created());
        assert!(first.path().is_file());

        let second = registry.get_file("A", "test", None, None).unwrap();
        assert!(!second.is_created());
        assert_eq!(first.path(), second.path());

        let other_realm = registry.get_file("sdfsdf", "test", None, None).unwrap();
        assert!(other_realm.is_created());
        assert_ne!(other_realm.path(), first.path());
        registry.close().unwrap();
    }

    #[test]
    fn test_prefix_and_suffix() {
        let temp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::open(temp.path()).unwrap();

        let p1 = claimed(registry.get_file("A", "test", None, None));
        let p5 = claimed(registry.get_file("A", "other", Some("pfx"), None));
        assert!(file_name(&p5).starts_with("pfx"));
        let p6 = claimed(registry.get_file("A", "new", None, Some(".sfx")));
        assert!(file_name(&p6).ends_with(".sfx"));
        assert_ne!(p6, p5);

        let expected: BTreeSet<PathBuf> = [p1, p5, p6].into_iter().collect();
        assert_eq!(registry.list_realm("A", true, true).unwrap(), expected);
        assert!(registry.list_realm("A", false, true).unwrap().is_empty());
        assert!(registry.list_realm("C", true, true).unwrap().is_empty());
    }

    #[test]
    fn test_collision_falls_back_to_random_name() {
        let temp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::open(temp.path()).unwrap();

        let p8 = claimed(registry.get_file("r", "v", None, Some(".s")));
        assert_eq!(file_name(&p8), "v.s");

        // "v.s" filters down to "vs", which is still free
        let p9 = claimed(registry.get_file("r", &file_name(&p8), None, None));
        assert_eq!(file_name(&p9), "vs");

        // "vs" is now taken on disk by another entry
        let px = registry.get_dir("r", "v@s").unwrap();
        assert!(px.is_created());
        assert!(px.path().is_dir());
        assert_ne!(px.path(), p9.as_path());
        assert!(file_name(px.path()).starts_with("vs"));

        let again = registry.get_dir("r", "v@s").unwrap();
        assert!(!again.is_created());
        assert_eq!(again.path(), px.path());

        let marker = claimed(registry.get_file("r", ".gitignore", None, None));
        assert_ne!(file_name(&marker), ".gitignore");
    }

    #[test]
    fn test_untracked_file_on_disk_is_not_reused() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("realms/out")).unwrap();
        fs::write(temp.path().join("realms/out/stale"), "old").unwrap();

        let mut registry = ResourceRegistry::open(temp.path()).unwrap();
        let claim = registry.get_file("out", "stale", None, None).unwrap();
        assert!(claim.is_created());
        assert_ne!(file_name(claim.path()), "stale");
        assert_eq!(fs::read_to_string(claim.path()).unwrap(), "");
    }

    #[test]
    fn test_existing_entry_rejects_other_affixes() {
        let temp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::open(temp.path()).unwrap();
        let path = claimed(registry.get_file("args", "data", Some("in"), Some(".txt")));
        assert_eq!(file_name(&path), "in.txt");

        assert_eq!(claimed(registry.get_file("args", "data", None, None)), path);
        assert_eq!(
            claimed(registry.get_file("args", "data", Some("in"), Some(".txt"))),
            path
        );
        assert!(matches!(
            registry.get_file("args", "data", None, Some(".csv")),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            registry.get_file("args", "data", Some("out"), None),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_kind_is_enforced() {
        let temp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::open(temp.path()).unwrap();
        registry.get_file("A", "f", None, None).unwrap();
        let err = registry.get_dir("A", "f").unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedKind {
                expected: "a directory",
                ..
            }
        ));
    }

    #[test]
    fn test_reopen_restores_mappings() {
        let temp = TempDir::new().unwrap();
        let (p1, p2, d1) = {
            let mut registry = ResourceRegistry::open(temp.path()).unwrap();
            let p1 = claimed(registry.get_file("A", "test", None, None));
            let p2 = claimed(registry.get_file("A", "other", Some("pfx"), Some(".tex")));
            let d1 = claimed(registry.get_dir("git", "gh_user_repo"));
            registry.close().unwrap();
            (p1, p2, d1)
        };

        let mut registry = ResourceRegistry::open(temp.path()).unwrap();
        let claim = registry.get_file("A", "test", None, None).unwrap();
        assert!(!claim.is_created());
        assert_eq!(claim.path(), p1.as_path());
        assert_eq!(
            claimed(registry.get_file("A", "other", Some("pfx"), Some(".tex"))),
            p2
        );
        assert_eq!(claimed(registry.get_dir("git", "gh_user_repo")), d1);
        let index = ResourceRegistry::read_index(registry.base_dir()).unwrap();
        assert_eq!(
            index.keys().cloned().collect::<Vec<_>>(),
            vec!["A".to_string(), "git".to_string()]
        );
        assert_eq!(index["A"]["test"], p1);
    }

    #[test]
    fn test_reopen_drops_deleted_entries() {
        let temp = TempDir::new().unwrap();
        let p1 = {
            let mut registry = ResourceRegistry::open(temp.path()).unwrap();
            let p1 = claimed(registry.get_file("A", "gone", None, None));
            registry.get_file("A", "kept", None, None).unwrap();
            registry.close().unwrap();
            p1
        };
        fs::remove_file(&p1).unwrap();

        let mut registry = ResourceRegistry::open(temp.path()).unwrap();
        assert_eq!(registry.entries("A").len(), 1);
        assert!(registry.get_file("A", "gone", None, None).unwrap().is_created());
        assert!(!registry.get_file("A", "kept", None, None).unwrap().is_created());
    }

    #[test]
    fn test_operations_after_close_fail() {
        let temp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::open(temp.path()).unwrap();
        registry.close().unwrap();
        registry.close().unwrap();
        assert!(!registry.is_open());
        assert!(matches!(
            registry.get_file("A", "x", None, None),
            Err(Error::AlreadyClosed { .. })
        ));
        assert!(matches!(
            registry.get_dir("A", "x"),
            Err(Error::AlreadyClosed { .. })
        ));
    }

    #[test]
    fn test_discard_removes_entry_and_empty_realm() {
        let temp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::open(temp.path()).unwrap();
        let dir = claimed(registry.get_dir("git", "x"));
        registry.discard("git", "x").unwrap();
        assert!(!dir.exists());
        assert!(registry.get_dir("git", "x").unwrap().is_created());
        registry.discard("git", "x").unwrap();
        registry.close().unwrap();

        assert!(!temp.path().join("realms/git").exists());
        assert!(!temp.path().join(INDEX_FILE).exists());
    }

    #[test]
    fn test_ignore_markers_and_sensitive_paths() {
        let temp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::open(temp.path()).unwrap();
        registry.get_file("output", "x", None, None).unwrap();
        let base = registry.base_dir().to_path_buf();
        assert!(base.join(".gitignore").is_file());
        assert!(base.join(".nojekyll").is_file());
        assert!(base.join("realms/output/.gitignore").is_file());

        let sensitive = registry.sensitive_paths();
        assert!(sensitive.contains(&base));
        assert!(sensitive.contains(&base.join("realms")));
        assert!(sensitive.contains(&base.join("realms/output")));
    }

    #[test]
    fn test_drop_persists_index() {
        let temp = TempDir::new().unwrap();
        let p = {
            let mut registry = ResourceRegistry::open(temp.path()).unwrap();
            claimed(registry.get_file("A", "x", None, None))
        };
        let mut registry = ResourceRegistry::open(temp.path()).unwrap();
        assert_eq!(claimed(registry.get_file("A", "x", None, None)), p);
    }
}
