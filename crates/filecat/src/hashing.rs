//! Content hashing.
//!
//! Two digests per file:
//! - `FastHash`: BLAKE3 over the first and last 64 KiB (the whole file when it is
//!   at most 128 KiB). A cache key for spotting already-known content; two files
//!   with equal probes are NOT known to be equal.
//! - `ContentHash`: SHA-256 over every byte, read in 4 KiB chunks. The identity of
//!   a blob.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

/// Bytes sampled from each end of the file by the fast probe.
pub const PROBE_WINDOW: u64 = 64 * 1024;

/// Read size for the full hash.
pub const FULL_HASH_CHUNK: usize = 4 * 1024;

macro_rules! define_hex_digest {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Hex length of a 256-bit digest.
            pub const HEX_LEN: usize = 64;

            pub fn as_str(&self) -> &str {
                &self.0
            }

            fn from_digest(bytes: &[u8]) -> Self {
                Self(hex::encode(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.len() != Self::HEX_LEN
                    || !trimmed.bytes().all(|b| b.is_ascii_hexdigit())
                {
                    return Err(format!(
                        "invalid {}: expected {} hex characters, got '{}'",
                        $label,
                        Self::HEX_LEN,
                        s
                    ));
                }
                Ok(Self(trimmed.to_ascii_lowercase()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl From<&$name> for filecat_db::DbValue {
            fn from(value: &$name) -> Self {
                filecat_db::DbValue::Text(value.0.clone())
            }
        }

        impl filecat_db::FromDbValue for $name {
            fn from_db_value(
                value: &filecat_db::DbValue,
            ) -> std::result::Result<Self, filecat_db::BackendError> {
                let raw = String::from_db_value(value)?;
                raw.parse().map_err(filecat_db::BackendError::TypeConversion)
            }
        }
    };
}

define_hex_digest!(ContentHash, "content hash");
define_hex_digest!(FastHash, "fast probe");

/// BLAKE3 over the head and tail windows of `reader`.
///
/// `size` is the length the caller observed when it opened the file; a file that
/// shrinks underneath surfaces as an `UnexpectedEof` I/O error.
pub fn fast_probe<R: Read + Seek>(reader: &mut R, size: u64) -> io::Result<FastHash> {
    let mut hasher = blake3::Hasher::new();
    reader.seek(SeekFrom::Start(0))?;

    if size <= PROBE_WINDOW * 2 {
        let copied = io::copy(&mut (&mut *reader).take(size), &mut hasher)?;
        if copied != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, read {}", size, copied),
            ));
        }
    } else {
        let mut window = vec![0u8; PROBE_WINDOW as usize];
        reader.read_exact(&mut window)?;
        hasher.update(&window);

        reader.seek(SeekFrom::Start(size - PROBE_WINDOW))?;
        reader.read_exact(&mut window)?;
        hasher.update(&window);
    }

    Ok(FastHash::from_digest(hasher.finalize().as_bytes()))
}

/// SHA-256 over every byte of `reader`, in 4 KiB chunks.
///
/// `on_progress` receives `(processed, total)` after each chunk; `total` is the
/// caller's size hint and is only reported, never enforced.
pub fn full_hash<R: Read>(
    reader: &mut R,
    total: u64,
    mut on_progress: Option<&mut dyn FnMut(u64, u64)>,
) -> io::Result<ContentHash> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; FULL_HASH_CHUNK];
    let mut processed: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        processed += n as u64;
        if let Some(callback) = on_progress.as_mut() {
            callback(processed, total);
        }
    }

    Ok(ContentHash::from_digest(&hasher.finalize()))
}

/// Full hash that must cover exactly `expected` bytes.
///
/// A file that grew or shrank after it was measured is an `InvalidData` error,
/// so a blob's size always agrees with its hash.
pub fn full_hash_exact<R: Read>(reader: &mut R, expected: u64) -> io::Result<ContentHash> {
    let mut processed: u64 = 0;
    let mut count = |done: u64, _total: u64| processed = done;
    let hash = full_hash(reader, expected, Some(&mut count as &mut dyn FnMut(u64, u64)))?;
    if processed != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "file changed while hashing: expected {} bytes, read {}",
                expected, processed
            ),
        ));
    }
    Ok(hash)
}

/// Fast probe of the file at `path`.
pub fn fast_probe_path(path: &Path) -> io::Result<FastHash> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    fast_probe(&mut file, size)
}

/// Full hash of the file at `path`.
pub fn full_hash_path(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    full_hash(&mut file, size, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn full_hash_matches_known_vectors() {
        let empty = full_hash(&mut Cursor::new(Vec::<u8>::new()), 0, None).unwrap();
        assert_eq!(empty.as_str(), EMPTY_SHA256);

        let abc = full_hash(&mut Cursor::new(b"abc".to_vec()), 3, None).unwrap();
        assert_eq!(abc.as_str(), ABC_SHA256);
    }

    #[test]
    fn full_hash_agrees_with_one_shot_digest_across_chunks() {
        let data = patterned(FULL_HASH_CHUNK * 3 + 17);
        let streamed = full_hash(&mut Cursor::new(data.clone()), data.len() as u64, None).unwrap();
        let expected = ContentHash::from_digest(&Sha256::digest(&data));
        assert_eq!(streamed, expected);
    }

    #[test]
    fn full_hash_reports_progress_per_chunk() {
        let data = patterned(FULL_HASH_CHUNK * 2 + 1);
        let mut calls = Vec::new();
        let mut record = |done: u64, total: u64| calls.push((done, total));
        full_hash(
            &mut Cursor::new(data.clone()),
            data.len() as u64,
            Some(&mut record as &mut dyn FnMut(u64, u64)),
        )
        .unwrap();

        let total = data.len() as u64;
        assert_eq!(
            calls,
            vec![
                (FULL_HASH_CHUNK as u64, total),
                (FULL_HASH_CHUNK as u64 * 2, total),
                (total, total)
            ]
        );
    }

    #[test]
    fn full_hash_exact_rejects_size_drift() {
        let data = patterned(FULL_HASH_CHUNK + 10);
        let len = data.len() as u64;

        let exact = full_hash_exact(&mut Cursor::new(data.clone()), len).unwrap();
        assert_eq!(exact, full_hash(&mut Cursor::new(data.clone()), len, None).unwrap());

        let grown = full_hash_exact(&mut Cursor::new(data.clone()), len - 1).unwrap_err();
        assert_eq!(grown.kind(), io::ErrorKind::InvalidData);
        let shrunk = full_hash_exact(&mut Cursor::new(data), len + 1).unwrap_err();
        assert_eq!(shrunk.kind(), io::ErrorKind::InvalidData);

        let empty = full_hash_exact(&mut Cursor::new(Vec::<u8>::new()), 0).unwrap();
        assert_eq!(empty.as_str(), EMPTY_SHA256);
    }

    #[test]
    fn fast_probe_small_file_hashes_everything() {
        let data = patterned(1000);
        let probe = fast_probe(&mut Cursor::new(data.clone()), 1000).unwrap();
        let expected = FastHash::from_digest(blake3::hash(&data).as_bytes());
        assert_eq!(probe, expected);
    }

    #[test]
    fn fast_probe_large_file_ignores_the_middle() {
        let size = (PROBE_WINDOW * 3) as usize;
        let a = patterned(size);
        let mut b = a.clone();
        b[size / 2] ^= 0xff;

        let probe_a = fast_probe(&mut Cursor::new(a.clone()), size as u64).unwrap();
        let probe_b = fast_probe(&mut Cursor::new(b.clone()), size as u64).unwrap();
        assert_eq!(probe_a, probe_b);

        let full_a = full_hash(&mut Cursor::new(a), size as u64, None).unwrap();
        let full_b = full_hash(&mut Cursor::new(b), size as u64, None).unwrap();
        assert_ne!(full_a, full_b);
    }

    #[test]
    fn fast_probe_short_read_is_an_error() {
        let err = fast_probe(&mut Cursor::new(vec![1u8; 10]), 20).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn digest_parsing_rejects_garbage() {
        assert!("xyz".parse::<ContentHash>().is_err());
        let upper = ABC_SHA256.to_ascii_uppercase();
        let parsed: ContentHash = upper.parse().unwrap();
        assert_eq!(parsed.as_str(), ABC_SHA256);
    }
}
