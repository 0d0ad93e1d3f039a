//! Release entry records
//!
//! A release entry is the `(filename, size, sha1)` identity of one payload
//! file, serialized as a single whitespace-separated line:
//!
//! ```text
//! 5B8E36E60C9C8BAE46A1CA9B4FEF50AE4F6A0C8E app.dll 48913
//! ```
//!
//! The applier uses these records to verify every patched payload against
//! the bytes the builder saw.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{Result, UpdeltaError};

/// Identity record for a single payload file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEntry {
    /// Name the entry was generated under
    pub filename: String,

    /// Payload size in bytes
    pub size: u64,

    /// Uppercase hex SHA-1 of the payload bytes
    pub sha1: String,
}

impl ReleaseEntry {
    /// Generate an entry by streaming a byte source
    ///
    /// The line format is whitespace-separated, so filenames containing
    /// whitespace are refused here rather than producing unparseable records.
    pub fn from_reader<R: Read>(filename: &str, mut reader: R) -> Result<Self> {
        if filename.is_empty() || filename.chars().any(char::is_whitespace) {
            return Err(UpdeltaError::MalformedEntry(format!(
                "invalid entry filename: {:?}",
                filename
            )));
        }

        let mut hasher = Sha1::new();
        let mut size: u64 = 0;
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            size += bytes_read as u64;
        }

        Ok(Self {
            filename: filename.to_string(),
            size,
            sha1: hex::encode_upper(hasher.finalize()),
        })
    }

    /// Generate an entry for a file on disk, labeled with its file name
    pub fn from_file(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| UpdeltaError::MalformedEntry(format!("no filename: {}", path.display())))?;

        let file = File::open(path)?;
        Self::from_reader(&filename, BufReader::with_capacity(1024 * 1024, file))
    }

    /// Parse the single-line serialized form
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || UpdeltaError::MalformedEntry(line.trim().to_string());

        let mut fields = line.split_whitespace();
        let sha1 = fields.next().ok_or_else(malformed)?;
        let filename = fields.next().ok_or_else(malformed)?;
        let size = fields.next().ok_or_else(malformed)?;
        if fields.next().is_some() {
            return Err(malformed());
        }

        if sha1.len() != 40 || !sha1.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(malformed());
        }

        Ok(Self {
            filename: filename.to_string(),
            size: size.parse().map_err(|_| malformed())?,
            sha1: sha1.to_ascii_uppercase(),
        })
    }

    /// Whether this entry matches another's payload identity (size + digest)
    pub fn matches(&self, other: &ReleaseEntry) -> bool {
        self.size == other.size && self.sha1.eq_ignore_ascii_case(&other.sha1)
    }
}

impl fmt::Display for ReleaseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.sha1, self.filename, self.size)
    }
}
