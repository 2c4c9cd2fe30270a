//! The user's external file store.

use crate::normalize_store_path;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use vf_core::VirtError;
use vf_core::VirtResult;

/// Collaborator that owns the user's files.
///
/// `resource_url_for` returns the opaque URL the host serves the file
/// under; the engine writes it into markup and maps it back to the path.
pub trait VaultStore {
    fn read(&self, path: &str) -> VirtResult<Vec<u8>>;
    fn resource_url_for(&self, path: &str) -> String;
    fn path_exists(&self, path: &str) -> bool;
}

/// Vault rooted at a directory on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryVault {
    root: PathBuf,
    origin: String,
}

impl DirectoryVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            origin: "app://vault".to_owned(),
        }
    }

    /// Overrides the `app:` origin resource URLs are minted under.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> VirtResult<PathBuf> {
        let normalized = normalize_store_path(path);
        if normalized
            .split('/')
            .any(|segment| segment == ".." || segment.contains(':'))
        {
            return Err(VirtError::new(
                "storage.vault.path_escape",
                format!("vault path `{path}` leaves the vault root"),
            ));
        }
        Ok(self.root.join(normalized))
    }
}

impl VaultStore for DirectoryVault {
    fn read(&self, path: &str) -> VirtResult<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|error| {
            let code = if error.kind() == ErrorKind::NotFound {
                "storage.vault.entry_missing"
            } else {
                "storage.vault.read_failed"
            };
            VirtError::new(code, format!("failed to read `{}`: {error}", full.display()))
        })
    }

    fn resource_url_for(&self, path: &str) -> String {
        let encoded = normalize_store_path(path)
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{encoded}", self.origin)
    }

    fn path_exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|full| full.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::DirectoryVault;
    use super::VaultStore;
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;

    fn temp_vault_root() -> std::path::PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|value| value.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("vframe-vault-test-{stamp}"))
    }

    #[test]
    fn reads_files_and_mints_resource_urls() {
        let root = temp_vault_root();
        assert!(std::fs::create_dir_all(root.join("notes")).is_ok());
        assert!(std::fs::write(root.join("notes/day one.html"), "<p>hi</p>").is_ok());

        let vault = DirectoryVault::new(&root);
        assert!(vault.path_exists("notes/day one.html"));
        assert!(!vault.path_exists("notes/day two.html"));
        assert_eq!(vault.read("/notes/day one.html"), Ok(b"<p>hi</p>".to_vec()));
        assert_eq!(
            vault.resource_url_for("notes/day one.html"),
            "app://vault/notes/day%20one.html"
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn refuses_paths_outside_the_root() {
        let vault = DirectoryVault::new(temp_vault_root());
        let outcome = vault.read("notes/../../etc/passwd");
        assert!(matches!(outcome, Err(error) if error.code == "storage.vault.path_escape"));
        assert!(!vault.path_exists("../x"));
    }

    #[test]
    fn missing_files_are_reported_as_missing() {
        let vault = DirectoryVault::new(temp_vault_root()).with_origin("app://other/");
        let outcome = vault.read("nope.html");
        assert!(matches!(outcome, Err(error) if error.code == "storage.vault.entry_missing"));
        assert_eq!(vault.resource_url_for("a.css"), "app://other/a.css");
    }
}
