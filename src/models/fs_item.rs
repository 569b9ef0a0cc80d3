//! File-system items as returned by the snapshot file lookup.

use crate::models::snapshot::CloudPlatform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Depth that expands a directory fully.
pub const EXPAND_ALL: i32 = -1;

/// Fields shared by files and directories.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FsCommon {
    pub file_id: String,
    /// Absolute path within the snapshot, e.g. `/dir/sub/file.bam`.
    pub path: String,
    pub created_date: DateTime<Utc>,
    pub description: Option<String>,
    pub size: i64,
    pub checksum_crc32c: Option<String>,
    pub checksum_md5: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FsFile {
    pub common: FsCommon,
    pub mime_type: Option<String>,
    /// `gs://bucket/object` or `https://{account}.blob.core.windows.net/{container}/{blob}`.
    pub cloud_path: String,
    pub cloud_platform: CloudPlatform,
    /// Bucket or storage account resource holding the bytes.
    pub bucket_resource_id: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FsDir {
    pub common: FsCommon,
    /// Whether `contents` was populated by the lookup.
    pub enumerated: bool,
    pub contents: Vec<FsItem>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum FsItem {
    File(FsFile),
    Dir(FsDir),
}

impl FsItem {
    pub fn common(&self) -> &FsCommon {
        match self {
            FsItem::File(file) => &file.common,
            FsItem::Dir(dir) => &dir.common,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.common().file_id
    }

    /// Last path segment; the root directory is named `/`.
    pub fn name(&self) -> &str {
        last_name_from_path(&self.common().path)
    }
}

pub fn last_name_from_path(path: &str) -> &str {
    path.split('/')
        .filter(|part| !part.is_empty())
        .next_back()
        .unwrap_or("/")
}
