//! GA4GH passport verification through the external credentials service.

use crate::{
    errors::{DrsError, DrsResult},
    models::snapshot::SnapshotSummary,
    services::collaborators::PassportVerifier,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};
use tracing::info;

const RAS_VISA_CRITERION: &str = "RASv1Dot1VisaCriterion";

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct VisaCriterion<'a> {
    #[serde(rename = "type")]
    criterion_type: &'a str,
    issuer: &'a str,
    phs_id: &'a str,
    consent_code: &'a str,
}

#[derive(Serialize, Debug)]
struct ValidatePassportRequest<'a> {
    passports: &'a [String],
    criteria: Vec<VisaCriterion<'a>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ValidatePassportResult {
    valid: bool,
    #[serde(default)]
    audit_info: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct EcmPassportClient {
    http: reqwest::Client,
    base_url: String,
    issuer: String,
}

impl EcmPassportClient {
    pub fn new(base_url: impl Into<String>, issuer: impl Into<String>, timeout: Duration) -> DrsResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            issuer: issuer.into(),
        })
    }
}

#[async_trait]
impl PassportVerifier for EcmPassportClient {
    async fn verify_passports(&self, summary: &SnapshotSummary, passports: &[String]) -> DrsResult<()> {
        let (phs_id, consent_code) = summary.passport_criteria().ok_or_else(|| {
            DrsError::Forbidden(format!(
                "snapshot {} is not accessible with a passport",
                summary.name
            ))
        })?;
        if passports.is_empty() {
            return Err(DrsError::Forbidden("no passports supplied".into()));
        }

        let request = ValidatePassportRequest {
            passports,
            criteria: vec![VisaCriterion {
                criterion_type: RAS_VISA_CRITERION,
                issuer: &self.issuer,
                phs_id,
                consent_code,
            }],
        };
        let response = self
            .http
            .post(format!("{}/api/oidc/v1/passport/validate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            // unparseable or expired passports
            return Err(DrsError::Forbidden(format!("passport rejected ({})", status)));
        }
        if !status.is_success() {
            return Err(DrsError::Upstream(format!("passport validation returned {}", status)));
        }

        let result: ValidatePassportResult = response.json().await?;
        info!(
            snapshot = %summary.id,
            valid = result.valid,
            audit = ?result.audit_info,
            "passport validation for {}",
            summary.name
        );
        if result.valid {
            Ok(())
        } else {
            Err(DrsError::Forbidden(format!(
                "no passport grants access to snapshot {}",
                summary.name
            )))
        }
    }
}
