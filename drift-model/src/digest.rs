use chrono::{DateTime, Utc};

/// Filesystem metadata captured alongside a content digest.
///
/// Used by the sync machinery to detect that a file changed between the hash
/// request and the hash completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatSnapshot {
    pub modified: Option<DateTime<Utc>>,
    /// Inode number where the platform exposes one.
    pub inode: Option<u64>,
}

/// Result of hashing one file: content digest plus auxiliary metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileDigest {
    /// Content hash in `algorithm:hex` form, e.g. `sha256:ab12...`.
    pub hash: String,
    /// Legacy CRC32 checksum carried for protocol compatibility.
    pub checksum: u32,
    /// File size in bytes at hash time.
    pub size: u64,
    /// Stat snapshot taken after reading the content.
    pub stat: StatSnapshot,
}
