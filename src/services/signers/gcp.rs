//! Google Cloud Storage access methods and V4 signed URLs.

use super::{CloudSigner, MethodContext, SignContext, URL_TTL, hmac_sha256, uri_encode};
use crate::{
    errors::{DrsError, DrsResult},
    models::{
        access_id::AccessId,
        drs_object::{AccessMethodType, DrsAccessMethod, DrsAccessUrl, DrsAuthorizations},
        snapshot::CloudPlatform,
    },
    services::collaborators::{DelegatedUrlSigner, ResourceLookup},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

const STORAGE_HOST: &str = "storage.googleapis.com";
const JSON_API_BASE: &str = "https://www.googleapis.com/storage/v1/b";
const ALGORITHM: &str = "GOOG4-HMAC-SHA256";

/// Split `gs://bucket/object` into its bucket and object name.
pub fn parse_gs_path(cloud_path: &str) -> DrsResult<(&str, &str)> {
    cloud_path
        .strip_prefix("gs://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(bucket, object)| !bucket.is_empty() && !object.is_empty())
        .ok_or_else(|| DrsError::Internal(format!("malformed gs path `{}`", cloud_path)))
}

/// GOOG4-HMAC-SHA256 query-string signer using an HMAC key pair.
#[derive(Clone)]
pub struct GoogV4Signer {
    access_id: String,
    secret: String,
}

impl GoogV4Signer {
    pub fn new(access_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            secret: secret.into(),
        }
    }

    pub fn sign(
        &self,
        bucket: &str,
        object: &str,
        user_project: Option<&str>,
        now: DateTime<Utc>,
    ) -> DrsResult<String> {
        let datestamp = now.format("%Y%m%d").to_string();
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!("{}/auto/storage/goog4_request", datestamp);

        let mut params = BTreeMap::new();
        params.insert("X-Goog-Algorithm", ALGORITHM.to_string());
        params.insert("X-Goog-Credential", format!("{}/{}", self.access_id, scope));
        params.insert("X-Goog-Date", timestamp.clone());
        params.insert("X-Goog-Expires", URL_TTL.as_secs().to_string());
        params.insert("X-Goog-SignedHeaders", "host".to_string());
        if let Some(project) = user_project {
            params.insert("userProject", project.to_string());
        }
        let query = params
            .iter()
            .map(|(key, value)| format!("{}={}", uri_encode(key, false), uri_encode(value, false)))
            .collect::<Vec<_>>()
            .join("&");

        let path = format!("/{}/{}", bucket, uri_encode(object, true));
        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            path, query, STORAGE_HOST
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            timestamp,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let mut key = hmac_sha256(format!("GOOG4{}", self.secret).as_bytes(), datestamp.as_bytes())?;
        for part in ["auto", "storage", "goog4_request"] {
            key = hmac_sha256(&key, part.as_bytes())?;
        }
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        Ok(format!(
            "https://{}{}?{}&X-Goog-Signature={}",
            STORAGE_HOST, path, query, signature
        ))
    }
}

pub struct GcpSigner {
    resources: Arc<dyn ResourceLookup>,
    hmac: Option<GoogV4Signer>,
    delegated: Option<Arc<dyn DelegatedUrlSigner>>,
    ras_issuer: String,
}

impl GcpSigner {
    pub fn new(
        resources: Arc<dyn ResourceLookup>,
        hmac: Option<GoogV4Signer>,
        delegated: Option<Arc<dyn DelegatedUrlSigner>>,
        ras_issuer: impl Into<String>,
    ) -> Self {
        Self {
            resources,
            hmac,
            delegated,
            ras_issuer: ras_issuer.into(),
        }
    }
}

#[async_trait]
impl CloudSigner for GcpSigner {
    async fn access_methods(&self, ctx: &MethodContext<'_>) -> DrsResult<Vec<DrsAccessMethod>> {
        let bucket = self.resources.bucket(ctx.file.bucket_resource_id).await?;
        let mut access_id = AccessId::new(CloudPlatform::Gcp, ctx.passport, bucket.region.as_str());
        if let Some(billing) = ctx.billing_snapshot {
            access_id = access_id.with_billing_snapshot(billing);
        }

        // passports and global ids only get an access id; the URL is signed later
        if ctx.passport || ctx.billing_snapshot.is_some() {
            let authorizations = if ctx.passport {
                DrsAuthorizations::bearer_and_passport(self.ras_issuer.as_str())
            } else {
                DrsAuthorizations::bearer()
            };
            return Ok(vec![DrsAccessMethod {
                method_type: AccessMethodType::Https,
                access_url: None,
                access_id: Some(access_id.to_string()),
                region: bucket.region,
                authorizations: Some(authorizations),
            }]);
        }

        let (bucket_name, object) = parse_gs_path(&ctx.file.cloud_path)?;
        let mut https = DrsAccessUrl::new(format!(
            "{}/{}/o/{}?alt=media",
            JSON_API_BASE,
            bucket_name,
            uri_encode(object, false)
        ));
        if let Some(user) = ctx.user {
            https.headers.push(format!("Authorization: Bearer {}", user.token));
        }

        Ok(vec![
            DrsAccessMethod {
                method_type: AccessMethodType::Gs,
                access_url: Some(DrsAccessUrl::new(ctx.file.cloud_path.as_str())),
                access_id: Some(access_id.to_string()),
                region: bucket.region.clone(),
                authorizations: Some(DrsAuthorizations::bearer()),
            },
            DrsAccessMethod {
                method_type: AccessMethodType::Https,
                access_url: Some(https),
                access_id: None,
                region: bucket.region,
                authorizations: Some(DrsAuthorizations::bearer()),
            },
        ])
    }

    async fn sign(&self, ctx: &SignContext<'_>) -> DrsResult<DrsAccessUrl> {
        let (bucket, object) = parse_gs_path(&ctx.file.cloud_path)?;

        if ctx.snapshot.is_self_hosted {
            if let (Some(delegated), Some(user), Some(project)) = (&self.delegated, ctx.user, ctx.user_project) {
                debug!("delegating signature of {} to IAM for project {}", ctx.file.cloud_path, project);
                let url = delegated
                    .sign_url_for_blob(user, project, bucket, object, URL_TTL)
                    .await?;
                return Ok(DrsAccessUrl::new(url));
            }
        }

        let signer = self
            .hmac
            .as_ref()
            .ok_or_else(|| DrsError::SigningFailure("no GCS signing credentials configured".into()))?;
        let user_project = ctx.user_project.or(ctx.snapshot.google_project_id.as_deref());
        let url = signer.sign(bucket, object, user_project, Utc::now())?;
        debug!("signed {} billed to {:?}", ctx.file.cloud_path, user_project);
        Ok(DrsAccessUrl::new(url))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        models::{
            fs_item::{FsCommon, FsFile},
            snapshot::{BillingProfile, SnapshotCacheResult},
        },
        services::collaborators::{AuthenticatedUser, BucketResource, StorageAccountResource},
    };
    use chrono::TimeZone;
    use std::{
        sync::Mutex,
        time::Duration,
    };
    use uuid::Uuid;

    pub(crate) struct FakeResources;

    #[async_trait]
    impl ResourceLookup for FakeResources {
        async fn bucket(&self, resource_id: Uuid) -> DrsResult<BucketResource> {
            Ok(BucketResource {
                id: resource_id,
                name: "tdr-bucket".into(),
                region: "us-central1".into(),
                google_project_id: "tdr-data".into(),
            })
        }

        async fn storage_account(&self, resource_id: Uuid) -> DrsResult<StorageAccountResource> {
            Ok(StorageAccountResource {
                id: resource_id,
                name: "tdrstorage".into(),
                region: "eastus".into(),
                account_key: "c2VjcmV0LWtleQ==".into(),
                tenant_id: Some("tenant-1".into()),
                subscription_id: Some("sub-1".into()),
            })
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DelegatedUrlSigner for RecordingDelegate {
        async fn sign_url_for_blob(
            &self,
            _user: &AuthenticatedUser,
            user_project: &str,
            bucket: &str,
            object: &str,
            ttl: Duration,
        ) -> DrsResult<String> {
            assert_eq!(ttl, URL_TTL);
            self.calls.lock().unwrap().push((user_project.to_string(), bucket.to_string()));
            Ok(format!("https://delegated/{}/{}", bucket, object))
        }
    }

    pub(crate) fn gcs_file(file_id: &str) -> FsFile {
        FsFile {
            common: FsCommon {
                file_id: file_id.into(),
                path: "/dir/a b.txt".into(),
                created_date: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
                description: None,
                size: 42,
                checksum_crc32c: Some("a1b2c3d4".into()),
                checksum_md5: None,
            },
            mime_type: None,
            cloud_path: format!("gs://tdr-bucket/{}/dir/a b.txt", file_id),
            cloud_platform: CloudPlatform::Gcp,
            bucket_resource_id: Uuid::from_u128(0xbb),
        }
    }

    pub(crate) fn gcp_snapshot(id: Uuid, self_hosted: bool) -> SnapshotCacheResult {
        let profile = BillingProfile {
            id: Uuid::from_u128(0xb111),
            cloud_platform: CloudPlatform::Gcp,
            tenant_id: None,
            subscription_id: None,
        };
        SnapshotCacheResult {
            id,
            name: format!("snapshot_{}", id.simple()),
            is_self_hosted: self_hosted,
            global_file_ids: false,
            billing_profile_id: profile.id,
            dataset_billing_profile: profile,
            cloud_platform: CloudPlatform::Gcp,
            google_project_id: Some("tdr-snapshot-project".into()),
            storage_account_resource_id: None,
            dataset_id: Uuid::from_u128(0xda7a),
            dataset_name: "dataset".into(),
        }
    }

    fn user() -> AuthenticatedUser {
        AuthenticatedUser {
            email: "reader@example.org".into(),
            token: "tok".into(),
        }
    }

    fn signer(delegated: Option<Arc<dyn DelegatedUrlSigner>>) -> GcpSigner {
        GcpSigner::new(
            Arc::new(FakeResources),
            Some(GoogV4Signer::new("GOOG1ACCESS", "secret")),
            delegated,
            "https://ras.example.org",
        )
    }

    #[test]
    fn gs_paths_split_into_bucket_and_object() {
        assert_eq!(parse_gs_path("gs://b/o/p.txt").unwrap(), ("b", "o/p.txt"));
        assert!(parse_gs_path("gs://b").is_err());
        assert!(parse_gs_path("https://b/o").is_err());
    }

    #[test]
    fn v4_urls_carry_the_signing_parameters() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let signer = GoogV4Signer::new("GOOG1ACCESS", "secret");
        let url = signer.sign("bucket", "dir/a b.txt", Some("payer"), now).unwrap();

        assert!(url.starts_with("https://storage.googleapis.com/bucket/dir/a%20b.txt?"));
        assert!(url.contains("X-Goog-Algorithm=GOOG4-HMAC-SHA256"));
        assert!(url.contains("X-Goog-Credential=GOOG1ACCESS%2F20240506%2Fauto%2Fstorage%2Fgoog4_request"));
        assert!(url.contains("X-Goog-Date=20240506T070809Z"));
        assert!(url.contains("X-Goog-Expires=900"));
        assert!(url.contains("userProject=payer"));

        let signature = url.rsplit("X-Goog-Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(url, signer.sign("bucket", "dir/a b.txt", Some("payer"), now).unwrap());
        let other = GoogV4Signer::new("GOOG1ACCESS", "other").sign("bucket", "dir/a b.txt", Some("payer"), now);
        assert_ne!(url, other.unwrap());
    }

    #[tokio::test]
    async fn bearer_v1_gets_gs_and_https_methods() {
        let file = gcs_file("f1");
        let snapshot = gcp_snapshot(Uuid::from_u128(1), false);
        let user = user();
        let methods = signer(None)
            .access_methods(&MethodContext {
                file: &file,
                snapshot: &snapshot,
                billing_snapshot: None,
                user: Some(&user),
                passport: false,
            })
            .await
            .unwrap();

        assert_eq!(methods.len(), 2);
        assert_eq!(methods[0].method_type, AccessMethodType::Gs);
        assert_eq!(methods[0].access_id.as_deref(), Some("gcp-us-central1"));
        assert_eq!(methods[0].access_url.as_ref().unwrap().url, file.cloud_path);
        let https = methods[1].access_url.as_ref().unwrap();
        assert_eq!(
            https.url,
            "https://www.googleapis.com/storage/v1/b/tdr-bucket/o/f1%2Fdir%2Fa%20b.txt?alt=media"
        );
        assert_eq!(https.headers, vec!["Authorization: Bearer tok".to_string()]);
        assert!(methods[1].access_id.is_none());
    }

    #[tokio::test]
    async fn passport_and_global_ids_get_a_single_https_access_id() {
        let file = gcs_file("f1");
        let snapshot = gcp_snapshot(Uuid::from_u128(1), false);
        let signer = signer(None);

        let passport = signer
            .access_methods(&MethodContext {
                file: &file,
                snapshot: &snapshot,
                billing_snapshot: None,
                user: None,
                passport: true,
            })
            .await
            .unwrap();
        assert_eq!(passport.len(), 1);
        assert_eq!(passport[0].access_id.as_deref(), Some("gcp-passport-us-central1"));
        assert!(passport[0].access_url.is_none());
        assert_eq!(
            passport[0].authorizations,
            Some(DrsAuthorizations::bearer_and_passport("https://ras.example.org"))
        );

        let billing = Uuid::from_u128(1).to_string();
        let global = signer
            .access_methods(&MethodContext {
                file: &file,
                snapshot: &snapshot,
                billing_snapshot: Some(&billing),
                user: None,
                passport: false,
            })
            .await
            .unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].access_id, Some(format!("gcp-us-central1*{}", billing)));
    }

    #[tokio::test]
    async fn self_hosted_with_user_project_is_delegated() {
        let delegate = Arc::new(RecordingDelegate::default());
        let signer = signer(Some(delegate.clone()));
        let file = gcs_file("f1");
        let user = user();

        let hosted = gcp_snapshot(Uuid::from_u128(1), true);
        let url = signer
            .sign(&SignContext {
                file: &file,
                snapshot: &hosted,
                user: Some(&user),
                user_project: Some("user-project"),
            })
            .await
            .unwrap();
        assert_eq!(url.url, "https://delegated/tdr-bucket/f1/dir/a b.txt");
        assert_eq!(
            *delegate.calls.lock().unwrap(),
            vec![("user-project".to_string(), "tdr-bucket".to_string())]
        );

        let managed = gcp_snapshot(Uuid::from_u128(2), false);
        let url = signer
            .sign(&SignContext {
                file: &file,
                snapshot: &managed,
                user: Some(&user),
                user_project: None,
            })
            .await
            .unwrap();
        assert!(url.url.starts_with("https://storage.googleapis.com/tdr-bucket/"));
        assert!(url.url.contains("userProject=tdr-snapshot-project"));
        assert_eq!(delegate.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn signing_without_credentials_fails() {
        let signer = GcpSigner::new(Arc::new(FakeResources), None, None, "issuer");
        let file = gcs_file("f1");
        let snapshot = gcp_snapshot(Uuid::from_u128(1), false);
        let err = signer
            .sign(&SignContext {
                file: &file,
                snapshot: &snapshot,
                user: None,
                user_project: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DrsError::SigningFailure(_)));
    }
}
