//! Azure Blob Storage access methods and service SAS URLs.

use super::{CloudSigner, MethodContext, SignContext, URL_TTL, hmac_sha256, uri_encode};
use crate::{
    errors::{DrsError, DrsResult},
    models::{
        access_id::AccessId,
        drs_object::{AccessMethodType, DrsAccessMethod, DrsAccessUrl, DrsAuthorizations},
        snapshot::{BillingProfile, CloudPlatform},
    },
    services::collaborators::{ResourceLookup, StorageAccountResource},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use url::Url;

const SAS_VERSION: &str = "2020-12-06";
const READ_PERMISSION: &str = "r";
const BLOB_RESOURCE: &str = "b";
const HTTPS_ONLY: &str = "https";
const BLOB_HOST_SUFFIX: &str = ".blob.core.windows.net";

/// Location of a blob parsed from its `https://{account}.blob.core.windows.net/...` path.
#[derive(Debug, PartialEq, Eq)]
pub struct BlobLocation {
    pub account: String,
    pub container: String,
    pub blob: String,
}

impl BlobLocation {
    pub fn parse(cloud_path: &str) -> DrsResult<Self> {
        let malformed = || DrsError::Internal(format!("malformed blob path `{}`", cloud_path));
        let url = Url::parse(cloud_path).map_err(|_| malformed())?;
        let account = url
            .host_str()
            .and_then(|host| host.strip_suffix(BLOB_HOST_SUFFIX))
            .filter(|account| !account.is_empty())
            .ok_or_else(malformed)?;
        let (container, blob) = url
            .path()
            .trim_start_matches('/')
            .split_once('/')
            .filter(|(container, blob)| !container.is_empty() && !blob.is_empty())
            .ok_or_else(malformed)?;
        Ok(Self {
            account: account.to_string(),
            container: container.to_string(),
            blob: blob.to_string(),
        })
    }

    fn url(&self) -> String {
        format!("https://{}{}/{}/{}", self.account, BLOB_HOST_SUFFIX, self.container, self.blob)
    }
}

/// Read-only service SAS signer keyed by a storage account's shared key.
pub struct SasSigner;

impl SasSigner {
    pub fn sign(location: &BlobLocation, account_key: &str, now: DateTime<Utc>) -> DrsResult<String> {
        let key = STANDARD
            .decode(account_key)
            .map_err(|err| DrsError::SigningFailure(format!("invalid storage account key: {}", err)))?;
        let start = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let expires_at = now + chrono::Duration::seconds(URL_TTL.as_secs() as i64);
        let expiry = expires_at.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let canonical_resource = format!("/blob/{}/{}/{}", location.account, location.container, location.blob);

        // permissions, start, expiry, resource, identifier, ip, protocol, version,
        // resource type, snapshot time, encryption scope, then five response headers
        let string_to_sign = [
            READ_PERMISSION,
            start.as_str(),
            expiry.as_str(),
            canonical_resource.as_str(),
            "",
            "",
            HTTPS_ONLY,
            SAS_VERSION,
            BLOB_RESOURCE,
            "",
            "",
            "",
            "",
            "",
            "",
            "",
        ]
        .join("\n");
        let signature = STANDARD.encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        Ok(format!(
            "sv={}&st={}&se={}&sr={}&sp={}&spr={}&sig={}",
            SAS_VERSION,
            uri_encode(&start, false),
            uri_encode(&expiry, false),
            BLOB_RESOURCE,
            READ_PERMISSION,
            HTTPS_ONLY,
            uri_encode(&signature, false)
        ))
    }
}

/// The shared key is only trusted for accounts owned by the snapshot's billing
/// profile: any tenant or subscription the profile names must match the account's.
fn check_billing_profile(account: &StorageAccountResource, profile: &BillingProfile) -> DrsResult<()> {
    let pairs = [
        ("tenant", &profile.tenant_id, &account.tenant_id),
        ("subscription", &profile.subscription_id, &account.subscription_id),
    ];
    for (field, expected, actual) in pairs {
        if let Some(expected) = expected {
            if actual.as_deref() != Some(expected.as_str()) {
                return Err(DrsError::SigningFailure(format!(
                    "storage account {} is not in {} {} of billing profile {}",
                    account.name, field, expected, profile.id
                )));
            }
        }
    }
    Ok(())
}

pub struct AzureSigner {
    resources: Arc<dyn ResourceLookup>,
    ras_issuer: String,
}

impl AzureSigner {
    pub fn new(resources: Arc<dyn ResourceLookup>, ras_issuer: impl Into<String>) -> Self {
        Self {
            resources,
            ras_issuer: ras_issuer.into(),
        }
    }
}

#[async_trait]
impl CloudSigner for AzureSigner {
    async fn access_methods(&self, ctx: &MethodContext<'_>) -> DrsResult<Vec<DrsAccessMethod>> {
        let account = self.resources.storage_account(ctx.file.bucket_resource_id).await?;
        let mut access_id = AccessId::new(CloudPlatform::Azure, ctx.passport, account.region.as_str());
        if let Some(billing) = ctx.billing_snapshot {
            access_id = access_id.with_billing_snapshot(billing);
        }
        let authorizations = if ctx.passport {
            DrsAuthorizations::bearer_and_passport(self.ras_issuer.as_str())
        } else {
            DrsAuthorizations::bearer()
        };
        Ok(vec![DrsAccessMethod {
            method_type: AccessMethodType::Https,
            access_url: None,
            access_id: Some(access_id.to_string()),
            region: account.region,
            authorizations: Some(authorizations),
        }])
    }

    async fn sign(&self, ctx: &SignContext<'_>) -> DrsResult<DrsAccessUrl> {
        let location = BlobLocation::parse(&ctx.file.cloud_path)?;
        let account = self.resources.storage_account(ctx.file.bucket_resource_id).await?;
        if account.name != location.account {
            return Err(DrsError::Internal(format!(
                "file {} lives in account {}, expected {}",
                ctx.file.common.file_id, location.account, account.name
            )));
        }
        check_billing_profile(&account, &ctx.snapshot.dataset_billing_profile)?;
        debug!(
            tenant = ?account.tenant_id,
            "signing {} for snapshot {}",
            ctx.file.cloud_path,
            ctx.snapshot.name
        );
        let sas = SasSigner::sign(&location, &account.account_key, Utc::now())?;
        Ok(DrsAccessUrl::new(format!("{}?{}", location.url(), sas)))
    }
}
