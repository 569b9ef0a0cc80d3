//! Persistent alias and DRS-id-to-snapshot association tables.
//!
//! Mutations run inside a transaction; SQLite transactions are serializable,
//! so concurrent registrations and deletions never interleave.

use crate::{
    errors::{DrsError, DrsResult},
    models::{
        alias::{DrsAlias, DrsAliasRow, DrsAliasSpec},
        drs_id::{AliasLookup, DrsId, DrsIdCodec},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct AliasRegistry {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
    codec: DrsIdCodec,
}

impl AliasRegistry {
    pub fn new(db: Arc<SqlitePool>, codec: DrsIdCodec) -> Self {
        Self { db, codec }
    }

    /// Record that each id is visible through `snapshot_id`.
    ///
    /// Existing pairs are left alone; returns the number of new rows.
    pub async fn record_drs_ids_to_snapshot(
        &self,
        snapshot_id: Uuid,
        drs_ids: &[DrsId],
    ) -> DrsResult<u64> {
        let mut tx = self.db.begin().await?;
        let mut inserted = 0;
        for drs_id in drs_ids {
            let result = sqlx::query(
                "INSERT INTO drs_id (drs_object_id, snapshot_id) VALUES (?, ?)
                 ON CONFLICT DO NOTHING",
            )
            .bind(drs_id.to_object_id())
            .bind(snapshot_id.to_string())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        debug!("recorded {} drs ids for snapshot {}", inserted, snapshot_id);
        Ok(inserted)
    }

    pub async fn delete_drs_ids_by_snapshot(&self, snapshot_id: Uuid) -> DrsResult<u64> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM drs_id WHERE snapshot_id = ?")
            .bind(snapshot_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Snapshots that reference a global file id, in snapshot id order.
    pub async fn retrieve_referenced_snapshot_ids(&self, drs_id: &DrsId) -> DrsResult<Vec<Uuid>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT snapshot_id FROM drs_id WHERE drs_object_id = ? ORDER BY snapshot_id",
        )
        .bind(drs_id.to_object_id())
        .fetch_all(&*self.db)
        .await?;

        rows.iter()
            .map(|raw| {
                Uuid::parse_str(raw).map_err(|err| {
                    DrsError::Internal(format!("corrupt snapshot id `{}` in drs_id: {}", raw, err))
                })
            })
            .collect()
    }

    /// Register aliases on behalf of a flight. All or nothing.
    pub async fn insert_drs_aliases(
        &self,
        specs: &[DrsAliasSpec],
        flight_id: &str,
        created_by: &str,
    ) -> DrsResult<u64> {
        let mut tx = self.db.begin().await?;
        let now = Utc::now();
        let mut inserted = 0;
        for spec in specs {
            let result = sqlx::query(
                "INSERT INTO drs_alias
                    (id, alias_drs_object_id, tdr_drs_object_id, created_date, created_by, flightid)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&spec.alias_drs_object_id)
            .bind(spec.tdr_drs_object_id.to_object_id())
            .bind(now)
            .bind(created_by)
            .bind(flight_id)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        debug!("flight {} registered {} drs aliases", flight_id, inserted);
        Ok(inserted)
    }

    pub async fn retrieve_drs_alias_by_alias(&self, alias: &str) -> DrsResult<Option<DrsAlias>> {
        let row = sqlx::query_as::<_, DrsAliasRow>(
            "SELECT id, alias_drs_object_id, tdr_drs_object_id, created_date, created_by, flightid
             FROM drs_alias
             WHERE alias_drs_object_id = ?",
        )
        .bind(alias)
        .fetch_optional(&*self.db)
        .await?;

        row.map(|row| self.alias_from_row(row)).transpose()
    }

    /// Undo the registrations of a failed flight.
    pub async fn delete_drs_aliases_by_flight(&self, flight_id: &str) -> DrsResult<u64> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM drs_alias WHERE flightid = ?")
            .bind(flight_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Remove aliases pointing at v1 ids bound to a deleted snapshot.
    pub async fn delete_drs_aliases_by_snapshot(&self, snapshot_id: Uuid) -> DrsResult<u64> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM drs_alias WHERE tdr_drs_object_id LIKE ? ESCAPE '\\'")
            .bind(format!("v1\\_{}\\_%", snapshot_id))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    fn alias_from_row(&self, row: DrsAliasRow) -> DrsResult<DrsAlias> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|err| DrsError::Internal(format!("corrupt alias id `{}`: {}", row.id, err)))?;
        Ok(DrsAlias {
            id,
            tdr_drs_object_id: self.codec.parse_object_id(&row.tdr_drs_object_id)?,
            alias_drs_object_id: row.alias_drs_object_id,
            created_date: row.created_date,
            created_by: row.created_by,
            flight_id: row.flightid,
        })
    }
}

#[async_trait]
impl AliasLookup for AliasRegistry {
    async fn canonical_object_id(&self, alias: &str) -> DrsResult<Option<String>> {
        let canonical: Option<String> = sqlx::query_scalar(
            "SELECT tdr_drs_object_id FROM drs_alias WHERE alias_drs_object_id = ?",
        )
        .bind(alias)
        .fetch_optional(&*self.db)
        .await?;
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn registry() -> AliasRegistry {
        AliasRegistry::new(Arc::new(test_pool().await), DrsIdCodec::new("data.example.org"))
    }

    fn snapshot(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[tokio::test]
    async fn association_insert_is_idempotent() {
        let registry = registry().await;
        let id = DrsId::v2("data.example.org", "file-1");

        assert_eq!(registry.record_drs_ids_to_snapshot(snapshot(1), &[id.clone()]).await.unwrap(), 1);
        assert_eq!(registry.record_drs_ids_to_snapshot(snapshot(1), &[id.clone()]).await.unwrap(), 0);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM drs_id")
            .fetch_one(&*registry.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(registry.retrieve_referenced_snapshot_ids(&id).await.unwrap(), vec![snapshot(1)]);
    }

    #[tokio::test]
    async fn association_enumerate_and_delete_by_snapshot() {
        let registry = registry().await;
        let a = DrsId::v2("data.example.org", "file-a");
        let b = DrsId::v2("data.example.org", "file-b");
        registry
            .record_drs_ids_to_snapshot(snapshot(2), &[a.clone(), b.clone()])
            .await
            .unwrap();
        registry.record_drs_ids_to_snapshot(snapshot(1), &[a.clone()]).await.unwrap();

        assert_eq!(
            registry.retrieve_referenced_snapshot_ids(&a).await.unwrap(),
            vec![snapshot(1), snapshot(2)]
        );

        assert_eq!(registry.delete_drs_ids_by_snapshot(snapshot(2)).await.unwrap(), 2);
        assert_eq!(registry.retrieve_referenced_snapshot_ids(&a).await.unwrap(), vec![snapshot(1)]);
        assert!(registry.retrieve_referenced_snapshot_ids(&b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn aliases_register_lookup_and_compensate() {
        let registry = registry().await;
        let target = DrsId::v1("data.example.org", snapshot(7), "file-1");
        let specs = vec![
            DrsAliasSpec {
                alias_drs_object_id: "dg.4503/abc".into(),
                tdr_drs_object_id: target.clone(),
            },
            DrsAliasSpec {
                alias_drs_object_id: "dg.4503/def".into(),
                tdr_drs_object_id: target.clone(),
            },
        ];
        assert_eq!(registry.insert_drs_aliases(&specs, "flight-1", "steward@example.org").await.unwrap(), 2);

        let alias = registry.retrieve_drs_alias_by_alias("dg.4503/abc").await.unwrap().unwrap();
        assert_eq!(alias.tdr_drs_object_id, target);
        assert_eq!(alias.flight_id, "flight-1");
        assert_eq!(alias.created_by, "steward@example.org");
        assert_eq!(
            registry.canonical_object_id("dg.4503/def").await.unwrap(),
            Some(target.to_object_id())
        );
        assert!(registry.retrieve_drs_alias_by_alias("missing").await.unwrap().is_none());

        assert_eq!(registry.delete_drs_aliases_by_flight("flight-1").await.unwrap(), 2);
        assert!(registry.canonical_object_id("dg.4503/abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_alias_rolls_back_the_whole_batch() {
        let registry = registry().await;
        let target = DrsId::v2("data.example.org", "file-1");
        let spec = DrsAliasSpec {
            alias_drs_object_id: "dup".into(),
            tdr_drs_object_id: target,
        };
        let err = registry
            .insert_drs_aliases(&[spec.clone(), spec], "flight-2", "steward@example.org")
            .await
            .unwrap_err();
        assert!(matches!(err, DrsError::Sqlx(_)));
        assert!(registry.canonical_object_id("dup").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_cleanup_only_removes_aliases_bound_to_that_snapshot() {
        let registry = registry().await;
        let specs = vec![
            DrsAliasSpec {
                alias_drs_object_id: "one".into(),
                tdr_drs_object_id: DrsId::v1("data.example.org", snapshot(1), "f"),
            },
            DrsAliasSpec {
                alias_drs_object_id: "two".into(),
                tdr_drs_object_id: DrsId::v1("data.example.org", snapshot(2), "f"),
            },
        ];
        registry.insert_drs_aliases(&specs, "flight-3", "steward@example.org").await.unwrap();
        assert_eq!(registry.delete_drs_aliases_by_snapshot(snapshot(1)).await.unwrap(), 1);
        assert!(registry.canonical_object_id("one").await.unwrap().is_none());
        assert!(registry.canonical_object_id("two").await.unwrap().is_some());
    }
}
