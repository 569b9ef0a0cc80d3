//! GA4GH DRS response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object version reported for every object; repository files are immutable.
pub const DRS_OBJECT_VERSION: &str = "0";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DrsChecksum {
    #[serde(rename = "type")]
    pub checksum_type: String,
    pub checksum: String,
}

impl DrsChecksum {
    pub fn new(checksum_type: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            checksum_type: checksum_type.into(),
            checksum: checksum.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AccessMethodType {
    Gs,
    Https,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthorizationType {
    BearerAuth,
    PassportAuth,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DrsAuthorizations {
    pub supported_types: Vec<AuthorizationType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passport_auth_issuers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bearer_auth_issuers: Vec<String>,
}

impl DrsAuthorizations {
    pub fn bearer() -> Self {
        Self {
            supported_types: vec![AuthorizationType::BearerAuth],
            ..Default::default()
        }
    }

    pub fn bearer_and_passport(issuer: impl Into<String>) -> Self {
        Self {
            supported_types: vec![AuthorizationType::BearerAuth, AuthorizationType::PassportAuth],
            passport_auth_issuers: vec![issuer.into()],
            bearer_auth_issuers: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DrsAccessUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
}

impl DrsAccessUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DrsAccessMethod {
    #[serde(rename = "type")]
    pub method_type: AccessMethodType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_url: Option<DrsAccessUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_id: Option<String>,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizations: Option<DrsAuthorizations>,
}

impl DrsAccessMethod {
    /// Sort key: region, then type, then every remaining field.
    pub fn sort_key(
        &self,
    ) -> (
        &str,
        AccessMethodType,
        Option<&str>,
        Option<&DrsAccessUrl>,
        Option<&DrsAuthorizations>,
    ) {
        (
            self.region.as_str(),
            self.method_type,
            self.access_id.as_deref(),
            self.access_url.as_ref(),
            self.authorizations.as_ref(),
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DrsContentsObject {
    pub name: String,
    pub id: String,
    pub drs_uri: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<DrsContentsObject>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DrsObject {
    pub id: String,
    pub name: String,
    pub self_uri: String,
    pub size: i64,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub checksums: Vec<DrsChecksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_methods: Option<Vec<DrsAccessMethod>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<DrsContentsObject>>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl DrsObject {
    pub fn is_directory(&self) -> bool {
        self.access_methods.is_none()
    }
}

/// Body accepted by the passport variants of the object and access endpoints.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DrsPassportRequest {
    #[serde(default)]
    pub passports: Vec<String>,
    #[serde(default)]
    pub expand: bool,
    #[serde(default)]
    pub access_project: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DrsServiceInfo {
    pub version: String,
    pub title: String,
    pub description: String,
    pub contact: String,
    pub license: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_protocol_field_names() {
        let method = DrsAccessMethod {
            method_type: AccessMethodType::Https,
            access_url: None,
            access_id: Some("gcp-passport-us-central1".into()),
            region: "us-central1".into(),
            authorizations: Some(DrsAuthorizations::bearer_and_passport("https://issuer")),
        };
        let value = serde_json::to_value(&method).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "https",
                "access_id": "gcp-passport-us-central1",
                "region": "us-central1",
                "authorizations": {
                    "supported_types": ["BearerAuth", "PassportAuth"],
                    "passport_auth_issuers": ["https://issuer"]
                }
            })
        );
        let checksum = serde_json::to_value(DrsChecksum::new("md5", "abc")).unwrap();
        assert_eq!(checksum, json!({"type": "md5", "checksum": "abc"}));
    }

    #[test]
    fn passport_request_defaults() {
        let req: DrsPassportRequest = serde_json::from_value(json!({"passports": ["jwt"]})).unwrap();
        assert_eq!(req.passports, vec!["jwt".to_string()]);
        assert!(!req.expand);
        assert!(req.access_project.is_none());
    }
}
