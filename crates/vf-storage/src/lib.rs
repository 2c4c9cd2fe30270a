//! Backing stores behind the store-backed schemes: the bundled archive, the
//! user's vault and raw local files.

mod archive;
mod local;
mod vault;

pub use archive::ArchiveStore;
pub use local::LocalFileAdapter;
pub use vault::DirectoryVault;
pub use vault::VaultStore;

/// Normalizes a store path: forward slashes, no leading `/` or `./`.
pub fn normalize_store_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut trimmed = unified.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_owned()
}
