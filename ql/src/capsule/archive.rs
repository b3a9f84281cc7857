//! Deterministic ZIP writing and content digests

use std::io::{Cursor, Write};

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::AssembleError;

/// Lowercase hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write entries into an in-memory ZIP
///
/// Entries must arrive in their final order (callers pass sorted paths).
/// With `reproducible` set, every entry carries a zeroed timestamp so the
/// same entries always produce byte-identical archives.
pub fn write_zip<'a, I>(entries: I, reproducible: bool) -> Result<Vec<u8>, AssembleError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    let mut options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    if reproducible {
        options = options.last_modified_time(zip::DateTime::default());
    }

    for (path, bytes) in entries {
        writer
            .start_file(path, options)
            .map_err(|e| AssembleError::Archive(e.to_string()))?;
        writer.write_all(bytes).map_err(|e| AssembleError::Archive(e.to_string()))?;
    }

    let cursor = writer.finish().map_err(|e| AssembleError::Archive(e.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        // Known digest of the empty string
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(sha256_hex(b"hello").len(), 64);
    }

    #[test]
    fn test_zip_roundtrip() {
        let entries = [("a.txt", b"alpha".as_slice()), ("dir/b.txt", b"beta".as_slice())];
        let bytes = write_zip(entries, true).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "dir/b.txt"]);
    }

    #[test]
    fn test_reproducible_archives_are_identical() {
        let entries = [("x.txt", b"same".as_slice()), ("y.txt", b"bytes".as_slice())];
        let first = write_zip(entries, true).unwrap();
        let second = write_zip(entries, true).unwrap();
        assert_eq!(first, second);
    }
}
