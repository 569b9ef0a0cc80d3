//! Narrow interfaces to the systems the resolver relies on but does not own:
//! the snapshot and file metadata stores, the IAM service, the passport
//! verifier, storage resource metadata and the delegated URL signer.

use crate::{
    errors::DrsResult,
    models::{
        fs_item::FsItem,
        snapshot::{SnapshotCacheResult, SnapshotProject, SnapshotSummary},
    },
};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Caller identity taken from the request's bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub email: String,
    pub token: String,
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fails with `SnapshotNotFound` when the snapshot no longer exists.
    async fn retrieve_snapshot(&self, snapshot_id: Uuid) -> DrsResult<SnapshotCacheResult>;

    async fn retrieve_project(&self, snapshot_id: Uuid) -> DrsResult<SnapshotProject>;

    async fn retrieve_summary(&self, snapshot_id: Uuid) -> DrsResult<SnapshotSummary>;
}

#[async_trait]
pub trait FileLookup: Send + Sync {
    /// Look up an item, expanding directories `depth` levels (`-1` for all).
    async fn lookup_fs_item(
        &self,
        project: &SnapshotProject,
        fs_object_id: &str,
        depth: i32,
    ) -> DrsResult<FsItem>;
}

#[async_trait]
pub trait AccessVerifier: Send + Sync {
    /// `Ok` when the user may read data from the snapshot, `Forbidden` otherwise.
    async fn verify_snapshot_read(&self, user: &AuthenticatedUser, snapshot_id: Uuid) -> DrsResult<()>;
}

#[async_trait]
pub trait PassportVerifier: Send + Sync {
    /// `Ok` when one of the passports carries a visa matching the snapshot's
    /// study and consent code.
    async fn verify_passports(&self, summary: &SnapshotSummary, passports: &[String]) -> DrsResult<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketResource {
    pub id: Uuid,
    pub name: String,
    pub region: String,
    pub google_project_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageAccountResource {
    pub id: Uuid,
    pub name: String,
    pub region: String,
    /// Base64 shared key used for SAS signing.
    pub account_key: String,
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
}

#[async_trait]
pub trait ResourceLookup: Send + Sync {
    async fn bucket(&self, resource_id: Uuid) -> DrsResult<BucketResource>;

    async fn storage_account(&self, resource_id: Uuid) -> DrsResult<StorageAccountResource>;
}

/// Signs on behalf of the caller, billing egress to `user_project`.
#[async_trait]
pub trait DelegatedUrlSigner: Send + Sync {
    async fn sign_url_for_blob(
        &self,
        user: &AuthenticatedUser,
        user_project: &str,
        bucket: &str,
        object: &str,
        ttl: Duration,
    ) -> DrsResult<String>;
}
