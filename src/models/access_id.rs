//! Access ids: `{cloudPrefix}{region}` with an optional `*{billingSnapshotId}`.
//!
//! The prefix alone tells the access-URL endpoint which signer to use.

use crate::errors::{DrsError, DrsResult};
use crate::models::snapshot::CloudPlatform;
use std::fmt;

pub const ACCESS_ID_PREFIX_GCP: &str = "gcp-";
pub const ACCESS_ID_PREFIX_AZURE: &str = "az-";
pub const ACCESS_ID_PREFIX_PASSPORT: &str = "passport-";
const BILLING_SEPARATOR: char = '*';

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessId {
    pub platform: CloudPlatform,
    pub passport: bool,
    pub region: String,
    pub billing_snapshot: Option<String>,
}

impl AccessId {
    pub fn new(platform: CloudPlatform, passport: bool, region: impl Into<String>) -> Self {
        Self {
            platform,
            passport,
            region: region.into(),
            billing_snapshot: None,
        }
    }

    pub fn with_billing_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.billing_snapshot = Some(snapshot_id.into());
        self
    }

    pub fn prefix(&self) -> String {
        let cloud = match self.platform {
            CloudPlatform::Gcp => ACCESS_ID_PREFIX_GCP,
            CloudPlatform::Azure => ACCESS_ID_PREFIX_AZURE,
        };
        if self.passport {
            format!("{}{}", cloud, ACCESS_ID_PREFIX_PASSPORT)
        } else {
            cloud.to_string()
        }
    }

    pub fn parse(raw: &str) -> DrsResult<Self> {
        let invalid = || DrsError::InvalidIdentifier(format!("Invalid access id '{}'", raw));
        let (platform, rest) = if let Some(rest) = raw.strip_prefix(ACCESS_ID_PREFIX_GCP) {
            (CloudPlatform::Gcp, rest)
        } else if let Some(rest) = raw.strip_prefix(ACCESS_ID_PREFIX_AZURE) {
            (CloudPlatform::Azure, rest)
        } else {
            return Err(invalid());
        };
        let (passport, rest) = match rest.strip_prefix(ACCESS_ID_PREFIX_PASSPORT) {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        let (region, billing_snapshot) = match rest.split_once(BILLING_SEPARATOR) {
            Some((region, billing)) if !billing.is_empty() && !billing.contains(BILLING_SEPARATOR) => {
                (region, Some(billing.to_string()))
            }
            Some(_) => return Err(invalid()),
            None => (rest, None),
        };
        if region.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            platform,
            passport,
            region: region.to_string(),
            billing_snapshot,
        })
    }
}

impl fmt::Display for AccessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix(), self.region)?;
        if let Some(billing) = &self.billing_snapshot {
            write!(f, "{}{}", BILLING_SEPARATOR, billing)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_all_prefixes() {
        let gcp = AccessId::new(CloudPlatform::Gcp, false, "us-central1");
        assert_eq!(gcp.to_string(), "gcp-us-central1");
        let gcp_passport = AccessId::new(CloudPlatform::Gcp, true, "us-central1")
            .with_billing_snapshot("snap-a");
        assert_eq!(gcp_passport.to_string(), "gcp-passport-us-central1*snap-a");
        let az = AccessId::new(CloudPlatform::Azure, false, "eastus");
        assert_eq!(az.to_string(), "az-eastus");
        let az_passport = AccessId::new(CloudPlatform::Azure, true, "eastus");
        assert_eq!(az_passport.to_string(), "az-passport-eastus");
    }

    #[test]
    fn parses_what_it_formats() {
        for raw in [
            "gcp-us-central1",
            "gcp-passport-us-central1",
            "az-eastus*0f0e0d0c-0000-0000-0000-000000000001",
            "az-passport-eastus",
        ] {
            assert_eq!(AccessId::parse(raw).unwrap().to_string(), raw);
        }
        let parsed = AccessId::parse("gcp-passport-us-east4*abc").unwrap();
        assert_eq!(parsed.platform, CloudPlatform::Gcp);
        assert!(parsed.passport);
        assert_eq!(parsed.region, "us-east4");
        assert_eq!(parsed.billing_snapshot.as_deref(), Some("abc"));
    }

    #[test]
    fn rejects_unknown_or_malformed() {
        for raw in ["", "aws-us-east-1", "gcp-", "gcp-passport-", "az-eastus*", "az-east*a*b", "gcp-*abc"] {
            assert!(
                matches!(AccessId::parse(raw), Err(DrsError::InvalidIdentifier(_))),
                "{raw}"
            );
        }
    }
}
