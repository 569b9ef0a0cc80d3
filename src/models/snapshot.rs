//! Snapshot projections consumed by the resolver.
//!
//! None of these are the full snapshot: each carries just enough to authorize,
//! look up files, attribute billing and sign URLs.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CloudPlatform {
    Gcp,
    Azure,
}

impl CloudPlatform {
    pub fn as_str(self) -> &'static str {
        match self {
            CloudPlatform::Gcp => "gcp",
            CloudPlatform::Azure => "azure",
        }
    }
}

impl fmt::Display for CloudPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gcp" => Ok(CloudPlatform::Gcp),
            "azure" => Ok(CloudPlatform::Azure),
            other => Err(format!("unsupported cloud platform `{}`", other)),
        }
    }
}

/// Billing profile of the snapshot's source dataset.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BillingProfile {
    pub id: Uuid,
    pub cloud_platform: CloudPlatform,
    /// Azure AD tenant that owns the storage accounts billed to this profile.
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
}

/// Cached projection of a snapshot, sufficient to serve DRS requests.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SnapshotCacheResult {
    pub id: Uuid,
    pub name: String,
    /// Storage lives in the caller's own project rather than the repository's.
    pub is_self_hosted: bool,
    /// Files are addressed with `v2` ids shared across snapshots.
    pub global_file_ids: bool,
    pub dataset_billing_profile: BillingProfile,
    /// The snapshot's own billing profile; used for billing attribution.
    pub billing_profile_id: Uuid,
    pub cloud_platform: CloudPlatform,
    pub google_project_id: Option<String>,
    pub storage_account_resource_id: Option<Uuid>,
    pub dataset_id: Uuid,
    pub dataset_name: String,
}

/// Summary used for passport eligibility.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub name: String,
    pub phs_id: Option<String>,
    pub consent_code: Option<String>,
}

impl SnapshotSummary {
    /// Passports can only be checked against snapshots that declare both a
    /// study accession and a consent code.
    pub fn passport_criteria(&self) -> Option<(&str, &str)> {
        match (self.phs_id.as_deref(), self.consent_code.as_deref()) {
            (Some(phs_id), Some(consent_code)) => Some((phs_id, consent_code)),
            _ => None,
        }
    }
}

/// Handle passed to the file lookup.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SnapshotProject {
    pub snapshot_id: Uuid,
    pub snapshot_name: String,
    pub dataset_id: Uuid,
    pub data_project: Option<String>,
}
