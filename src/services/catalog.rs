//! SQLite-backed snapshot catalog.
//!
//! Serves snapshot projections, the snapshot file system and storage resource
//! metadata out of the service database. Directory contents are loaded level by
//! level down to the requested depth.

use crate::{
    errors::{DrsError, DrsResult},
    models::{
        fs_item::{FsCommon, FsDir, FsFile, FsItem},
        snapshot::{BillingProfile, CloudPlatform, SnapshotCacheResult, SnapshotProject, SnapshotSummary},
    },
    services::collaborators::{BucketResource, FileLookup, ResourceLookup, SnapshotSource, StorageAccountResource},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct Catalog {
    pub db: Arc<SqlitePool>,
}

#[derive(FromRow, Debug)]
struct SnapshotRow {
    id: String,
    name: String,
    self_hosted: bool,
    global_file_ids: bool,
    billing_profile_id: String,
    dataset_id: String,
    dataset_name: String,
    dataset_billing_profile_id: String,
    google_project_id: Option<String>,
    storage_account_resource_id: Option<String>,
    phs_id: Option<String>,
    consent_code: Option<String>,
    cloud_platform: String,
    tenant_id: Option<String>,
    subscription_id: Option<String>,
}

#[derive(FromRow, Debug)]
struct FsItemRow {
    file_id: String,
    path: String,
    is_dir: bool,
    created_date: DateTime<Utc>,
    description: Option<String>,
    size: i64,
    checksum_crc32c: Option<String>,
    checksum_md5: Option<String>,
    mime_type: Option<String>,
    cloud_path: Option<String>,
    cloud_platform: Option<String>,
    bucket_resource_id: Option<String>,
}

#[derive(FromRow, Debug)]
struct ResourceRow {
    id: String,
    name: String,
    region: String,
    extra: String,
}

#[derive(FromRow, Debug)]
struct StorageAccountRow {
    id: String,
    name: String,
    region: String,
    account_key: String,
    tenant_id: Option<String>,
    subscription_id: Option<String>,
}

const SNAPSHOT_COLUMNS: &str = "s.id, s.name, s.self_hosted, s.global_file_ids, s.billing_profile_id,
    s.dataset_id, s.dataset_name, s.dataset_billing_profile_id, s.google_project_id,
    s.storage_account_resource_id, s.phs_id, s.consent_code,
    b.cloud_platform, b.tenant_id, b.subscription_id";

const FS_ITEM_COLUMNS: &str = "file_id, path, is_dir, created_date, description, size,
    checksum_crc32c, checksum_md5, mime_type, cloud_path, cloud_platform, bucket_resource_id";

impl Catalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    async fn fetch_snapshot_row(&self, snapshot_id: Uuid) -> DrsResult<SnapshotRow> {
        let sql = format!(
            "SELECT {} FROM snapshot s JOIN billing_profile b ON b.id = s.dataset_billing_profile_id
             WHERE s.id = ?",
            SNAPSHOT_COLUMNS
        );
        sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(snapshot_id.to_string())
            .fetch_optional(&*self.db)
            .await?
            .ok_or(DrsError::SnapshotNotFound(snapshot_id))
    }

    async fn fetch_item_row(&self, snapshot_id: Uuid, file_id: &str) -> DrsResult<Option<FsItemRow>> {
        let sql = format!(
            "SELECT {} FROM fs_item WHERE snapshot_id = ? AND file_id = ?",
            FS_ITEM_COLUMNS
        );
        Ok(sqlx::query_as::<_, FsItemRow>(&sql)
            .bind(snapshot_id.to_string())
            .bind(file_id)
            .fetch_optional(&*self.db)
            .await?)
    }

    async fn fetch_children(&self, snapshot_id: Uuid, parent_id: &str) -> DrsResult<Vec<FsItemRow>> {
        let sql = format!(
            "SELECT {} FROM fs_item WHERE snapshot_id = ? AND parent_id = ? ORDER BY path",
            FS_ITEM_COLUMNS
        );
        Ok(sqlx::query_as::<_, FsItemRow>(&sql)
            .bind(snapshot_id.to_string())
            .bind(parent_id)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Build an item from its row, loading directory contents while `depth`
    /// allows.
    fn build_item(&self, snapshot_id: Uuid, row: FsItemRow, depth: i32) -> BoxFuture<'_, DrsResult<FsItem>> {
        Box::pin(async move {
            let common = FsCommon {
                file_id: row.file_id.clone(),
                path: row.path,
                created_date: row.created_date,
                description: row.description,
                size: row.size,
                checksum_crc32c: row.checksum_crc32c,
                checksum_md5: row.checksum_md5,
            };

            if !row.is_dir {
                let corrupt = |what: &str| {
                    DrsError::Internal(format!("file {} is missing its {}", row.file_id, what))
                };
                let cloud_path = row.cloud_path.ok_or_else(|| corrupt("cloud path"))?;
                let cloud_platform = row
                    .cloud_platform
                    .as_deref()
                    .ok_or_else(|| corrupt("cloud platform"))?
                    .parse::<CloudPlatform>()
                    .map_err(DrsError::Internal)?;
                let bucket_resource_id = parse_uuid(
                    row.bucket_resource_id.as_deref().ok_or_else(|| corrupt("bucket resource"))?,
                )?;
                return Ok(FsItem::File(FsFile {
                    common,
                    mime_type: row.mime_type,
                    cloud_path,
                    cloud_platform,
                    bucket_resource_id,
                }));
            }

            if depth == 0 {
                return Ok(FsItem::Dir(FsDir {
                    common,
                    enumerated: false,
                    contents: Vec::new(),
                }));
            }

            let child_depth = if depth < 0 { depth } else { depth - 1 };
            let mut contents = Vec::new();
            for child in self.fetch_children(snapshot_id, &row.file_id).await? {
                contents.push(self.build_item(snapshot_id, child, child_depth).await?);
            }
            Ok(FsItem::Dir(FsDir {
                common,
                enumerated: true,
                contents,
            }))
        })
    }

    async fn fetch_resource(&self, sql: &str, resource_id: Uuid, kind: &str) -> DrsResult<ResourceRow> {
        sqlx::query_as::<_, ResourceRow>(sql)
            .bind(resource_id.to_string())
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| DrsError::Internal(format!("{} resource {} not found", kind, resource_id)))
    }
}

fn parse_uuid(raw: &str) -> DrsResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| DrsError::Internal(format!("corrupt id `{}`: {}", raw, err)))
}

#[async_trait]
impl SnapshotSource for Catalog {
    async fn retrieve_snapshot(&self, snapshot_id: Uuid) -> DrsResult<SnapshotCacheResult> {
        let row = self.fetch_snapshot_row(snapshot_id).await?;
        let cloud_platform = row
            .cloud_platform
            .parse::<CloudPlatform>()
            .map_err(DrsError::NotImplemented)?;
        Ok(SnapshotCacheResult {
            id: parse_uuid(&row.id)?,
            name: row.name,
            is_self_hosted: row.self_hosted,
            global_file_ids: row.global_file_ids,
            dataset_billing_profile: BillingProfile {
                id: parse_uuid(&row.dataset_billing_profile_id)?,
                cloud_platform,
                tenant_id: row.tenant_id,
                subscription_id: row.subscription_id,
            },
            billing_profile_id: parse_uuid(&row.billing_profile_id)?,
            cloud_platform,
            google_project_id: row.google_project_id,
            storage_account_resource_id: row
                .storage_account_resource_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            dataset_id: parse_uuid(&row.dataset_id)?,
            dataset_name: row.dataset_name,
        })
    }

    async fn retrieve_project(&self, snapshot_id: Uuid) -> DrsResult<SnapshotProject> {
        let row = self.fetch_snapshot_row(snapshot_id).await?;
        Ok(SnapshotProject {
            snapshot_id,
            snapshot_name: row.name,
            dataset_id: parse_uuid(&row.dataset_id)?,
            data_project: row.google_project_id.or(row.storage_account_resource_id),
        })
    }

    async fn retrieve_summary(&self, snapshot_id: Uuid) -> DrsResult<SnapshotSummary> {
        let row = self.fetch_snapshot_row(snapshot_id).await?;
        Ok(SnapshotSummary {
            id: snapshot_id,
            name: row.name,
            phs_id: row.phs_id,
            consent_code: row.consent_code,
        })
    }
}

#[async_trait]
impl FileLookup for Catalog {
    async fn lookup_fs_item(
        &self,
        project: &SnapshotProject,
        fs_object_id: &str,
        depth: i32,
    ) -> DrsResult<FsItem> {
        let row = self
            .fetch_item_row(project.snapshot_id, fs_object_id)
            .await?
            .ok_or_else(|| {
                DrsError::ObjectNotFound(format!(
                    "file {} in snapshot {}",
                    fs_object_id, project.snapshot_name
                ))
            })?;
        self.build_item(project.snapshot_id, row, depth).await
    }
}

#[async_trait]
impl ResourceLookup for Catalog {
    async fn bucket(&self, resource_id: Uuid) -> DrsResult<BucketResource> {
        let row = self
            .fetch_resource(
                "SELECT id, name, region, google_project_id AS extra FROM bucket_resource WHERE id = ?",
                resource_id,
                "bucket",
            )
            .await?;
        Ok(BucketResource {
            id: parse_uuid(&row.id)?,
            name: row.name,
            region: row.region,
            google_project_id: row.extra,
        })
    }

    async fn storage_account(&self, resource_id: Uuid) -> DrsResult<StorageAccountResource> {
        let row = sqlx::query_as::<_, StorageAccountRow>(
            "SELECT id, name, region, account_key, tenant_id, subscription_id
             FROM storage_account_resource WHERE id = ?",
        )
        .bind(resource_id.to_string())
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| DrsError::Internal(format!("storage account resource {} not found", resource_id)))?;
        Ok(StorageAccountResource {
            id: parse_uuid(&row.id)?,
            name: row.name,
            region: row.region,
            account_key: row.account_key,
            tenant_id: row.tenant_id,
            subscription_id: row.subscription_id,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::db::test_pool;

    async fn seeded() -> (Catalog, Uuid) {
        let pool = test_pool().await;
        let snapshot = Uuid::from_u128(0x5a);
        let bucket = Uuid::from_u128(0xbb);
        insert_gcp_snapshot(&pool, snapshot, bucket).await;
        insert_dir(&pool, snapshot, "root", None, "/").await;
        insert_dir(&pool, snapshot, "dir", Some("root"), "/dir").await;
        insert_dir(&pool, snapshot, "sub", Some("dir"), "/dir/sub").await;
        insert_file(&pool, snapshot, "f1", "dir", "/dir/a.txt", bucket).await;
        insert_file(&pool, snapshot, "f2", "sub", "/dir/sub/b.txt", bucket).await;
        (Catalog::new(Arc::new(pool)), snapshot)
    }

    fn dir(item: FsItem) -> FsDir {
        match item {
            FsItem::Dir(dir) => dir,
            FsItem::File(file) => panic!("expected a directory, got {:?}", file),
        }
    }

    #[tokio::test]
    async fn snapshot_projection_joins_billing_profile() {
        let (catalog, snapshot) = seeded().await;
        let cached = catalog.retrieve_snapshot(snapshot).await.unwrap();
        assert_eq!(cached.id, snapshot);
        assert_eq!(cached.cloud_platform, CloudPlatform::Gcp);
        assert_eq!(cached.google_project_id.as_deref(), Some("tdr-snapshot-project"));
        assert!(!cached.global_file_ids);

        let summary = catalog.retrieve_summary(snapshot).await.unwrap();
        assert_eq!(summary.passport_criteria(), Some(("phs000001", "c1")));

        let missing = Uuid::from_u128(0xdead);
        assert!(matches!(
            catalog.retrieve_snapshot(missing).await,
            Err(DrsError::SnapshotNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn lookup_respects_depth() {
        let (catalog, snapshot) = seeded().await;
        let project = catalog.retrieve_project(snapshot).await.unwrap();

        let shallow = dir(catalog.lookup_fs_item(&project, "dir", 1).await.unwrap());
        assert!(shallow.enumerated);
        assert_eq!(shallow.contents.len(), 2);
        let sub = shallow
            .contents
            .iter()
            .find_map(|item| match item {
                FsItem::Dir(d) => Some(d),
                FsItem::File(_) => None,
            })
            .unwrap();
        assert!(!sub.enumerated);

        let unexpanded = dir(catalog.lookup_fs_item(&project, "dir", 0).await.unwrap());
        assert!(!unexpanded.enumerated);
        assert!(unexpanded.contents.is_empty());

        let full = dir(catalog.lookup_fs_item(&project, "root", -1).await.unwrap());
        let dir_level = dir(full.contents[0].clone());
        let sub_level = dir(dir_level
            .contents
            .iter()
            .find(|item| item.file_id() == "sub")
            .cloned()
            .unwrap());
        assert!(sub_level.enumerated);
        assert_eq!(sub_level.contents[0].name(), "b.txt");
    }

    #[tokio::test]
    async fn missing_file_is_object_not_found() {
        let (catalog, snapshot) = seeded().await;
        let project = catalog.retrieve_project(snapshot).await.unwrap();
        assert!(matches!(
            catalog.lookup_fs_item(&project, "nope", 1).await,
            Err(DrsError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_cloud_platform_is_not_implemented() {
        let (catalog, _) = seeded().await;
        let snapshot = Uuid::from_u128(0x77);
        sqlx::query("INSERT INTO billing_profile (id, cloud_platform) VALUES ('aws-profile', 'aws')")
            .execute(&*catalog.db)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO snapshot (id, name, billing_profile_id, dataset_id, dataset_name,
                dataset_billing_profile_id)
             VALUES (?, 'aws_snapshot', 'aws-profile', ?, 'dataset', 'aws-profile')",
        )
        .bind(snapshot.to_string())
        .bind(Uuid::from_u128(0xda7a).to_string())
        .execute(&*catalog.db)
        .await
        .unwrap();
        assert!(matches!(
            catalog.retrieve_snapshot(snapshot).await,
            Err(DrsError::NotImplemented(_))
        ));
    }

    #[tokio::test]
    async fn resolves_bucket_metadata() {
        let (catalog, _) = seeded().await;
        let bucket = catalog.bucket(Uuid::from_u128(0xbb)).await.unwrap();
        assert_eq!(bucket.region, "us-central1");
        assert!(catalog.storage_account(Uuid::from_u128(0xbb)).await.is_err());
    }

    #[tokio::test]
    async fn resolves_storage_account_with_its_tenant() {
        let (catalog, _) = seeded().await;
        let account_id = Uuid::from_u128(0x5a);
        sqlx::query(
            "INSERT INTO storage_account_resource (id, name, region, account_key, tenant_id, subscription_id)
             VALUES (?, 'tdrstorage', 'eastus', 'c2VjcmV0LWtleQ==', 'tenant-1', NULL)",
        )
        .bind(account_id.to_string())
        .execute(&*catalog.db)
        .await
        .unwrap();

        let account = catalog.storage_account(account_id).await.unwrap();
        assert_eq!(account.name, "tdrstorage");
        assert_eq!(account.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(account.subscription_id, None);
    }
}
