//! Externally issued aliases for canonical DRS ids.

use crate::models::drs_id::DrsId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Request to register one alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrsAliasSpec {
    pub alias_drs_object_id: String,
    pub tdr_drs_object_id: DrsId,
}

/// A registered alias. Never updated in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrsAlias {
    pub id: Uuid,
    pub alias_drs_object_id: String,
    pub tdr_drs_object_id: DrsId,
    pub created_date: DateTime<Utc>,
    pub created_by: String,
    /// Flight that registered the alias; used to undo a failed registration.
    pub flight_id: String,
}

/// Raw `drs_alias` row.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct DrsAliasRow {
    pub id: String,
    pub alias_drs_object_id: String,
    pub tdr_drs_object_id: String,
    pub created_date: DateTime<Utc>,
    pub created_by: String,
    pub flightid: String,
}
