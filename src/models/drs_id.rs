//! DRS object identifiers and their wire formats.
//!
//! Two shapes are issued:
//! - `v1_{snapshotId}_{fsObjectId}`: the object is bound to exactly one snapshot.
//! - `v2_{fsObjectId}`: a global file id; the snapshots that expose the file are
//!   recorded in the `drs_id` association table.
//!
//! The URI form of either is `drs://{authority}/{objectId}`.

use crate::errors::{DrsError, DrsResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

const DRS_SCHEME: &str = "drs";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DrsVersion {
    V1,
    V2,
}

impl DrsVersion {
    pub fn tag(self) -> &'static str {
        match self {
            DrsVersion::V1 => "v1",
            DrsVersion::V2 => "v2",
        }
    }
}

impl fmt::Display for DrsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A parsed DRS identifier.
///
/// `snapshot_id` is always present for [`DrsVersion::V1`] and always absent for
/// [`DrsVersion::V2`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DrsId {
    pub authority: String,
    pub version: DrsVersion,
    pub snapshot_id: Option<Uuid>,
    pub fs_object_id: String,
}

impl DrsId {
    pub fn v1(authority: impl Into<String>, snapshot_id: Uuid, fs_object_id: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            version: DrsVersion::V1,
            snapshot_id: Some(snapshot_id),
            fs_object_id: fs_object_id.into(),
        }
    }

    pub fn v2(authority: impl Into<String>, fs_object_id: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            version: DrsVersion::V2,
            snapshot_id: None,
            fs_object_id: fs_object_id.into(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.version == DrsVersion::V2
    }

    /// Canonical object id, e.g. `v1_{snapshotId}_{fsObjectId}`.
    pub fn to_object_id(&self) -> String {
        match (self.version, self.snapshot_id) {
            (DrsVersion::V2, _) => format!("{}_{}", DrsVersion::V2, self.fs_object_id),
            (DrsVersion::V1, Some(snapshot_id)) => {
                format!("{}_{}_{}", DrsVersion::V1, snapshot_id, self.fs_object_id)
            }
            (DrsVersion::V1, None) => format!("{}__{}", DrsVersion::V1, self.fs_object_id),
        }
    }

    /// `drs://{authority}/{objectId}`.
    ///
    /// An authority or object id that cannot form a valid URI is a server-side
    /// fault, never a client error.
    pub fn to_uri(&self) -> DrsResult<String> {
        let raw = format!("{}://{}/{}", DRS_SCHEME, self.authority, self.to_object_id());
        let parsed = Url::parse(&raw)
            .map_err(|err| DrsError::Internal(format!("cannot build DRS URI `{}`: {}", raw, err)))?;
        if parsed.authority().is_empty() {
            return Err(DrsError::Internal(format!(
                "cannot build DRS URI `{}`: empty authority",
                raw
            )));
        }
        Ok(raw)
    }
}

impl fmt::Display for DrsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_object_id())
    }
}

/// Alias indirection used by [`DrsIdCodec::resolve_incoming_id`].
#[async_trait]
pub trait AliasLookup: Send + Sync {
    /// Returns the canonical object id registered for `alias`, if any.
    async fn canonical_object_id(&self, alias: &str) -> DrsResult<Option<String>>;
}

/// Parses and builds DRS ids for one authority (the service's public host name).
#[derive(Clone, Debug)]
pub struct DrsIdCodec {
    authority: String,
}

impl DrsIdCodec {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The id a file-system item has when seen through a snapshot.
    pub fn make_drs_id(&self, fs_object_id: &str, snapshot_id: Uuid, global_file_ids: bool) -> DrsId {
        if global_file_ids {
            DrsId::v2(self.authority.clone(), fs_object_id)
        } else {
            DrsId::v1(self.authority.clone(), snapshot_id, fs_object_id)
        }
    }

    pub fn parse_object_id(&self, object_id: &str) -> DrsResult<DrsId> {
        let invalid = || DrsError::InvalidIdentifier(format!("Invalid object id format '{}'", object_id));
        let parts: Vec<&str> = object_id.split('_').collect();
        match parts.as_slice() {
            ["v1", snapshot, fs_object] if !fs_object.is_empty() => {
                let snapshot_id = Uuid::parse_str(snapshot).map_err(|_| invalid())?;
                Ok(DrsId::v1(self.authority.clone(), snapshot_id, *fs_object))
            }
            ["v2", fs_object] if !fs_object.is_empty() => {
                Ok(DrsId::v2(self.authority.clone(), *fs_object))
            }
            _ => Err(invalid()),
        }
    }

    /// Parse `drs://{authority}/{objectId}`.
    ///
    /// The authority in the URI is kept as given; it does not have to match
    /// this codec's authority.
    pub fn parse_uri(&self, uri: &str) -> DrsResult<DrsId> {
        let invalid = |why: &str| DrsError::InvalidIdentifier(format!("Invalid DRS URI '{}': {}", uri, why));
        let parsed = Url::parse(uri).map_err(|err| invalid(&err.to_string()))?;
        if parsed.scheme() != DRS_SCHEME {
            return Err(invalid("scheme must be drs"));
        }
        let authority = parsed.authority();
        if authority.is_empty() {
            return Err(invalid("missing authority"));
        }
        let object_id = parsed
            .path()
            .strip_prefix('/')
            .ok_or_else(|| invalid("path must start with '/'"))?;
        let mut id = self.parse_object_id(object_id)?;
        id.authority = authority.to_string();
        Ok(id)
    }

    /// Parse an id as received from a client. Anything that does not have a
    /// canonical shape is treated as an alias.
    pub async fn resolve_incoming_id(&self, raw: &str, aliases: &dyn AliasLookup) -> DrsResult<DrsId> {
        if has_canonical_shape(raw) {
            return self.parse_object_id(raw);
        }
        match aliases.canonical_object_id(raw).await? {
            Some(canonical) => {
                tracing::debug!("resolved DRS alias {} => {}", raw, canonical);
                self.parse_object_id(&canonical)
            }
            None => Err(DrsError::InvalidIdentifier(format!(
                "Invalid object id format '{}'",
                raw
            ))),
        }
    }
}

/// True for `v1_x_y` and `v2_x` with non-empty parts.
pub fn has_canonical_shape(raw: &str) -> bool {
    let parts: Vec<&str> = raw.split('_').collect();
    match parts.as_slice() {
        ["v1", a, b] => !a.is_empty() && !b.is_empty(),
        ["v2", a] => !a.is_empty(),
        _ => false,
    }
}
