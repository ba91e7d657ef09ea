//! Content digest computation.
//!
//! The algorithm is injectable so platforms (and tests) can swap it out; the
//! daemon default streams the file once through SHA-256 and CRC32.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use drift_model::{FileDigest, StatSnapshot};

/// Computes the content digest for one path. Implementations run on the hash
/// worker's thread and may block on file I/O.
pub trait ContentHasher: Send + Sync {
    fn digest(&self, path: &Path) -> io::Result<FileDigest>;
}

/// Default hasher: streaming SHA-256 content hash plus the legacy CRC32
/// checksum, file size, and a stat snapshot taken after the read.
#[derive(Debug, Clone)]
pub struct Sha256Hasher {
    read_buffer_bytes: usize,
}

impl Sha256Hasher {
    pub fn new(read_buffer_bytes: usize) -> Self {
        Self {
            read_buffer_bytes: read_buffer_bytes.max(512),
        }
    }
}

impl Default for Sha256Hasher {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl ContentHasher for Sha256Hasher {
    fn digest(&self, path: &Path) -> io::Result<FileDigest> {
        let mut file = File::open(path)?;
        let mut sha = Sha256::new();
        let mut crc = crc32fast::Hasher::new();
        let mut buf = vec![0u8; self.read_buffer_bytes];
        let mut size = 0u64;

        loop {
            let read = file.read(&mut buf)?;
            if read == 0 {
                break;
            }
            sha.update(&buf[..read]);
            crc.update(&buf[..read]);
            size += read as u64;
        }

        // Stat after the read so the snapshot reflects the hashed content as
        // closely as the platform allows.
        let meta = file.metadata()?;
        let modified = meta.modified().ok().map(DateTime::<Utc>::from);
        #[cfg(unix)]
        let inode = {
            use std::os::unix::fs::MetadataExt;
            Some(meta.ino())
        };
        #[cfg(not(unix))]
        let inode = None;

        Ok(FileDigest {
            hash: format!("sha256:{:x}", sha.finalize()),
            checksum: crc.finalize(),
            size,
            stat: StatSnapshot { modified, inode },
        })
    }
}
