// ── Policy file store ──
//
// Text files guarded by an opaque version token. A write carries the
// token of the read it was based on and is rejected if the file moved
// on in the meantime. Two special tokens exist: `any` skips the check
// and `new` requires the file not to exist yet.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

pub const TOKEN_ANY: &str = "any";
pub const TOKEN_NEW: &str = "new";

/// Name prefix that routes a unified name to the include files.
pub const INCLUDE_PREFIX: &str = "include/";

const POLICY_EXT: &str = "policy";

pub trait PolicyStore: Send + Sync {
    fn policy_list(&self) -> Result<Vec<String>>;
    /// File content and its current token.
    fn policy_get(&self, name: &str) -> Result<(String, String)>;
    fn policy_replace(&self, name: &str, content: &str, token: &str) -> Result<()>;

    fn policy_include_list(&self) -> Result<Vec<String>>;
    fn policy_include_get(&self, name: &str) -> Result<(String, String)>;
    fn policy_include_replace(&self, name: &str, content: &str, token: &str) -> Result<()>;
}

/// Check a write token against the file's current token (`None` when
/// the file does not exist).
pub fn check_token(name: &str, current: Option<&str>, token: &str) -> Result<()> {
    match (token, current) {
        (TOKEN_ANY, _) | (TOKEN_NEW, None) => Ok(()),
        (TOKEN_NEW, Some(_)) => Err(Error::PolicyExists { name: name.into() }),
        (_, None) => Err(Error::PolicyNotFound { name: name.into() }),
        (token, Some(current)) if token == current => Ok(()),
        _ => Err(Error::TokenMismatch { name: name.into() }),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidPolicyName { name: name.into() });
    }
    Ok(())
}

// ── MemoryPolicyStore ───────────────────────────────────────────────

#[derive(Debug, Clone)]
struct MemoryFile {
    content: String,
    revision: u64,
}

#[derive(Debug, Default)]
struct MemoryFiles {
    policies: BTreeMap<String, MemoryFile>,
    includes: BTreeMap<String, MemoryFile>,
    revision: u64,
}

impl MemoryFiles {
    fn table(&mut self, include: bool) -> &mut BTreeMap<String, MemoryFile> {
        if include {
            &mut self.includes
        } else {
            &mut self.policies
        }
    }
}

/// Store kept in memory; tokens are revision numbers.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    files: Mutex<MemoryFiles>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a policy file, bypassing the token check.
    pub fn with_policy(self, name: &str, content: &str) -> Self {
        self.write(false, name, content);
        self
    }

    pub fn with_include(self, name: &str, content: &str) -> Self {
        self.write(true, name, content);
        self
    }

    fn write(&self, include: bool, name: &str, content: &str) {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.revision += 1;
        let revision = files.revision;
        files.table(include).insert(
            name.to_owned(),
            MemoryFile {
                content: content.to_owned(),
                revision,
            },
        );
    }

    fn list(&self, include: bool) -> Vec<String> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.table(include).keys().cloned().collect()
    }

    fn get(&self, include: bool, name: &str) -> Result<(String, String)> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .table(include)
            .get(name)
            .map(|f| (f.content.clone(), f.revision.to_string()))
            .ok_or_else(|| Error::PolicyNotFound { name: name.into() })
    }

    fn replace(&self, include: bool, name: &str, content: &str, token: &str) -> Result<()> {
        validate_name(name)?;
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let current = files.table(include).get(name).map(|f| f.revision.to_string());
        check_token(name, current.as_deref(), token)?;
        files.revision += 1;
        let revision = files.revision;
        files.table(include).insert(
            name.to_owned(),
            MemoryFile {
                content: content.to_owned(),
                revision,
            },
        );
        Ok(())
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn policy_list(&self) -> Result<Vec<String>> {
        Ok(self.list(false))
    }

    fn policy_get(&self, name: &str) -> Result<(String, String)> {
        self.get(false, name)
    }

    fn policy_replace(&self, name: &str, content: &str, token: &str) -> Result<()> {
        self.replace(false, name, content, token)
    }

    fn policy_include_list(&self) -> Result<Vec<String>> {
        Ok(self.list(true))
    }

    fn policy_include_get(&self, name: &str) -> Result<(String, String)> {
        self.get(true, name)
    }

    fn policy_include_replace(&self, name: &str, content: &str, token: &str) -> Result<()> {
        self.replace(true, name, content, token)
    }
}

// ── DirPolicyStore ──────────────────────────────────────────────────

/// Store backed by a directory: `{root}/{name}.policy` for policies and
/// `{root}/include/{name}` for include files. Tokens are the SHA-256 of
/// the content.
#[derive(Debug)]
pub struct DirPolicyStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DirPolicyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, include: bool, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(if include {
            self.root.join("include").join(name)
        } else {
            self.root.join(format!("{name}.{POLICY_EXT}"))
        })
    }

    fn list(&self, include: bool) -> Result<Vec<String>> {
        let dir = if include {
            self.root.join("include")
        } else {
            self.root.clone()
        };
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = if include {
                path.file_name().and_then(|n| n.to_str())
            } else if path.extension().is_some_and(|e| e == POLICY_EXT) {
                path.file_stem().and_then(|n| n.to_str())
            } else {
                None
            };
            if let Some(name) = name.filter(|n| !n.starts_with('.')) {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(path: &Path) -> Result<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, include: bool, name: &str) -> Result<(String, String)> {
        let path = self.path(include, name)?;
        let text = Self::read(&path)?.ok_or_else(|| Error::PolicyNotFound { name: name.into() })?;
        let token = content_token(&text);
        Ok((text, token))
    }

    fn replace(&self, include: bool, name: &str, content: &str, token: &str) -> Result<()> {
        let path = self.path(include, name)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = Self::read(&path)?.map(|text| content_token(&text));
        check_token(name, current.as_deref(), token)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_file_name(format!(".{name}.tmp"));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), bytes = content.len(), "policy written");
        Ok(())
    }
}

/// Hex SHA-256 of a file's content.
pub fn content_token(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

impl PolicyStore for DirPolicyStore {
    fn policy_list(&self) -> Result<Vec<String>> {
        self.list(false)
    }

    fn policy_get(&self, name: &str) -> Result<(String, String)> {
        self.get(false, name)
    }

    fn policy_replace(&self, name: &str, content: &str, token: &str) -> Result<()> {
        self.replace(false, name, content, token)
    }

    fn policy_include_list(&self) -> Result<Vec<String>> {
        self.list(true)
    }

    fn policy_include_get(&self, name: &str) -> Result<(String, String)> {
        self.get(true, name)
    }

    fn policy_include_replace(&self, name: &str, content: &str, token: &str) -> Result<()> {
        self.replace(true, name, content, token)
    }
}

// ── PrefixedPolicyStore ─────────────────────────────────────────────

/// Single namespace over a store: `include/foo` names an include file,
/// every other name a policy file.
#[derive(Clone)]
pub struct PrefixedPolicyStore {
    inner: Arc<dyn PolicyStore>,
}

impl PrefixedPolicyStore {
    pub fn new(inner: Arc<dyn PolicyStore>) -> Self {
        Self { inner }
    }

    /// Every policy name followed by every include name with its prefix.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = self.inner.policy_list()?;
        names.extend(
            self.inner
                .policy_include_list()?
                .into_iter()
                .map(|n| format!("{INCLUDE_PREFIX}{n}")),
        );
        Ok(names)
    }

    pub fn get(&self, name: &str) -> Result<(String, String)> {
        match name.strip_prefix(INCLUDE_PREFIX) {
            Some(include) => self.inner.policy_include_get(include),
            None => self.inner.policy_get(name),
        }
    }

    pub fn replace(&self, name: &str, content: &str, token: &str) -> Result<()> {
        match name.strip_prefix(INCLUDE_PREFIX) {
            Some(include) => self.inner.policy_include_replace(include, content, token),
            None => self.inner.policy_replace(name, content, token),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn token_rules() {
        assert!(check_token("a", None, TOKEN_ANY).is_ok());
        assert!(check_token("a", Some("3"), TOKEN_ANY).is_ok());
        assert!(check_token("a", None, TOKEN_NEW).is_ok());
        assert!(matches!(
            check_token("a", Some("3"), TOKEN_NEW),
            Err(Error::PolicyExists { .. })
        ));
        assert!(check_token("a", Some("3"), "3").is_ok());
        assert!(matches!(
            check_token("a", Some("4"), "3"),
            Err(Error::TokenMismatch { .. })
        ));
        assert!(matches!(
            check_token("a", None, "3"),
            Err(Error::PolicyNotFound { .. })
        ));
    }

    #[test]
    fn memory_store_bumps_token_on_write() {
        let store = MemoryPolicyStore::new().with_policy("50-config-clipboard", "a\n");
        let (_, token) = store.policy_get("50-config-clipboard").unwrap();
        store
            .policy_replace("50-config-clipboard", "b\n", &token)
            .unwrap();
        let err = store
            .policy_replace("50-config-clipboard", "c\n", &token)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.policy_get("50-config-clipboard").unwrap().0, "b\n");
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let store = MemoryPolicyStore::new();
        let err = store.policy_replace("../etc", "x", TOKEN_NEW).unwrap_err();
        assert!(matches!(err, Error::InvalidPolicyName { .. }));
    }

    #[test]
    fn prefixed_store_routes_includes() {
        let inner = MemoryPolicyStore::new()
            .with_policy("30-user", "p\n")
            .with_include("admin-local-rwx", "i\n");
        let store = PrefixedPolicyStore::new(Arc::new(inner));

        assert_eq!(store.list().unwrap(), vec!["30-user", "include/admin-local-rwx"]);
        assert_eq!(store.get("include/admin-local-rwx").unwrap().0, "i\n");
        assert_eq!(store.get("30-user").unwrap().0, "p\n");
    }
}
