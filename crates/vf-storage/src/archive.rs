//! In-memory archive loaded from a zip image.

use crate::normalize_store_path;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::io::Read;
use tracing::debug;
use vf_core::VirtError;
use vf_core::VirtResult;
use zip::ZipArchive;
use zip::result::ZipError;

/// Read-only bundle of application assets keyed by normalized path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStore {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ArchiveStore {
    /// Builds an archive from already materialized entries.
    pub fn from_entries<I, P, B>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: AsRef<str>,
        B: Into<Vec<u8>>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(path, body)| (normalize_store_path(path.as_ref()), body.into()))
                .collect(),
        }
    }

    /// Parses a zip image and inflates every file entry up front. Entry
    /// checksums are verified as the entries are read.
    pub fn from_zip_bytes(data: &[u8]) -> VirtResult<Self> {
        let mut zip = ZipArchive::new(Cursor::new(data)).map_err(archive_error)?;

        let mut entries = BTreeMap::new();
        for index in 0..zip.len() {
            let mut file = zip.by_index(index).map_err(archive_error)?;
            if file.is_dir() {
                continue;
            }

            let name = file.name().to_owned();
            let mut body = Vec::new();
            file.read_to_end(&mut body).map_err(|error| {
                let code = if error.to_string().contains("checksum") {
                    "storage.archive.crc_mismatch"
                } else {
                    "storage.archive.inflate_failed"
                };
                VirtError::new(code, format!("entry `{name}` could not be read: {error}"))
            })?;
            entries.insert(normalize_store_path(&name), body);
        }

        debug!(entries = entries.len(), bytes = data.len(), "archive loaded");
        Ok(Self { entries })
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries
            .get(&normalize_store_path(path))
            .map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&normalize_store_path(path))
    }

    pub fn read(&self, path: &str) -> VirtResult<Vec<u8>> {
        self.get(path).map(<[u8]>::to_vec).ok_or_else(|| {
            VirtError::new(
                "storage.archive.entry_missing",
                format!("archive has no entry `{path}`"),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn archive_error(error: ZipError) -> VirtError {
    match error {
        ZipError::UnsupportedArchive(reason) if reason == ZipError::PASSWORD_REQUIRED => {
            VirtError::new("storage.archive.encrypted", "archive entries are encrypted")
        }
        ZipError::UnsupportedArchive(reason) => VirtError::new(
            "storage.archive.method_unsupported",
            format!("archive is unsupported: {reason}"),
        ),
        other => VirtError::new("storage.archive.malformed", format!("archive is malformed: {other}")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::ArchiveStore;
    use std::io::Cursor;
    use std::io::Write;
    use zip::CompressionMethod;
    use zip::ZipWriter;
    use zip::write::FileOptions;

    /// Zip image for fixtures: `(name, body, deflate)`. Names ending in `/`
    /// become directory entries.
    pub(crate) fn zip_image(files: &[(&str, &[u8], bool)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body, deflate) in files {
            let method = if *deflate {
                CompressionMethod::Deflated
            } else {
                CompressionMethod::Stored
            };
            let options = FileOptions::default().compression_method(method);
            if name.ends_with('/') {
                assert!(writer.add_directory(*name, options).is_ok());
                continue;
            }
            assert!(writer.start_file(*name, options).is_ok());
            assert!(writer.write_all(body).is_ok());
        }
        match writer.finish() {
            Ok(cursor) => cursor.into_inner(),
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn loads_stored_and_deflated_entries() {
        let css = b"body { background: url(img/bg.png) }".repeat(8);
        let image = zip_image(&[
            ("index.html", b"<html><body>hi</body></html>".as_slice(), false),
            ("css/", b"".as_slice(), false),
            ("css/site.css", css.as_slice(), true),
        ]);

        let archive = match ArchiveStore::from_zip_bytes(&image) {
            Ok(archive) => archive,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.get("/index.html"), Some(b"<html><body>hi</body></html>".as_slice()));
        assert_eq!(archive.read("css/site.css"), Ok(css));
        assert_eq!(archive.paths().collect::<Vec<_>>(), vec!["css/site.css", "index.html"]);
    }

    #[test]
    fn reads_entries_with_zip64_records() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);
        assert!(writer.start_file("book/chapter.html", options).is_ok());
        assert!(writer.write_all(b"<p>large</p>").is_ok());
        let image = match writer.finish() {
            Ok(cursor) => cursor.into_inner(),
            Err(error) => panic!("{error}"),
        };

        let archive = match ArchiveStore::from_zip_bytes(&image) {
            Ok(archive) => archive,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(archive.get("book/chapter.html"), Some(b"<p>large</p>".as_slice()));
    }

    #[test]
    fn missing_entries_report_their_path() {
        let archive = ArchiveStore::from_entries([("a.txt", b"a".to_vec())]);
        let outcome = archive.read("b.txt");
        assert!(matches!(outcome, Err(error) if error.code == "storage.archive.entry_missing"));
    }

    #[test]
    fn rejects_corrupt_images() {
        let outcome = ArchiveStore::from_zip_bytes(b"definitely not a zip file at all");
        assert!(matches!(outcome, Err(error) if error.code == "storage.archive.malformed"));

        let mut image = zip_image(&[("a.txt", b"hello".as_slice(), false)]);
        let Some(payload_at) = image.windows(5).position(|window| window == b"hello") else {
            panic!("stored payload not found in the image");
        };
        // Flip a payload byte so the CRC no longer matches.
        image[payload_at] ^= 0xFF;
        let outcome = ArchiveStore::from_zip_bytes(&image);
        assert!(matches!(outcome, Err(error) if error.code == "storage.archive.crc_mismatch"));
    }
}
