//! Raw filesystem reads for `file:` locators.

use std::fs;
use std::path::PathBuf;
use vf_core::VirtError;
use vf_core::VirtResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalFileAdapter;

impl LocalFileAdapter {
    /// Native path for the path component of a `file:` URL.
    ///
    /// Backslashes become `/`, and `/C:/dir` keeps its drive form as
    /// `C:/dir`.
    pub fn native_path(url_path: &str) -> PathBuf {
        let decoded = urlencoding::decode(url_path)
            .map(|value| value.into_owned())
            .unwrap_or_else(|_| url_path.to_owned());
        let unified = decoded.replace('\\', "/");

        let bytes = unified.as_bytes();
        let has_drive = bytes.len() >= 3
            && bytes[0] == b'/'
            && bytes[1].is_ascii_alphabetic()
            && bytes[2] == b':';
        if has_drive {
            PathBuf::from(&unified[1..])
        } else {
            PathBuf::from(unified)
        }
    }

    pub fn read(&self, url_path: &str) -> VirtResult<Vec<u8>> {
        let path = Self::native_path(url_path);
        fs::read(&path).map_err(|error| {
            VirtError::new(
                "storage.file.read_failed",
                format!("failed to read `{}`: {error}", path.display()),
            )
        })
    }
}
