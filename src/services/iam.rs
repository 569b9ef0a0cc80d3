//! IAM (Sam) client: snapshot read checks and delegated URL signing.

use crate::{
    errors::{DrsError, DrsResult},
    services::collaborators::{AccessVerifier, AuthenticatedUser, DelegatedUrlSigner},
};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const SNAPSHOT_RESOURCE_TYPE: &str = "datasnapshot";
const READ_DATA_ACTION: &str = "read_data";

#[derive(Clone)]
pub struct SamClient {
    http: reqwest::Client,
    base_url: String,
}

impl SamClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> DrsResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn check_status(response: Response, what: &str) -> DrsResult<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(DrsError::Unauthorized(format!(
                "IAM rejected the caller's token while {}",
                what
            ))),
            StatusCode::FORBIDDEN => Err(DrsError::Forbidden(format!("IAM denied {}", what))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DrsError::Upstream(format!(
                    "IAM returned {} while {}: {}",
                    status, what, body
                )))
            }
        }
    }
}

#[async_trait]
impl AccessVerifier for SamClient {
    async fn verify_snapshot_read(&self, user: &AuthenticatedUser, snapshot_id: Uuid) -> DrsResult<()> {
        let url = format!(
            "{}/api/resources/v2/{}/{}/action/{}",
            self.base_url, SNAPSHOT_RESOURCE_TYPE, snapshot_id, READ_DATA_ACTION
        );
        let response = self.http.get(&url).bearer_auth(&user.token).send().await?;
        let what = format!("checking {} on snapshot {}", READ_DATA_ACTION, snapshot_id);
        let allowed: bool = Self::check_status(response, &what).await?.json().await?;
        debug!("{} {} snapshot {}: {}", user.email, READ_DATA_ACTION, snapshot_id, allowed);
        if allowed {
            Ok(())
        } else {
            Err(DrsError::Forbidden(format!(
                "User '{}' does not have required action: {} on snapshot {}",
                user.email, READ_DATA_ACTION, snapshot_id
            )))
        }
    }
}

#[async_trait]
impl DelegatedUrlSigner for SamClient {
    async fn sign_url_for_blob(
        &self,
        user: &AuthenticatedUser,
        user_project: &str,
        bucket: &str,
        object: &str,
        ttl: Duration,
    ) -> DrsResult<String> {
        let url = format!(
            "{}/api/google/v1/user/petServiceAccount/{}/signedUrlForBlob",
            self.base_url, user_project
        );
        let body = json!({
            "bucketName": bucket,
            "blobName": object,
            "duration": ttl.as_secs() / 60,
            "requesterPays": true,
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&user.token)
            .json(&body)
            .send()
            .await?;
        let what = format!("signing gs://{}/{} for project {}", bucket, object, user_project);
        let signed: String = Self::check_status(response, &what)
            .await?
            .json()
            .await
            .map_err(|err| DrsError::SigningFailure(err.to_string()))?;
        Ok(signed)
    }
}
