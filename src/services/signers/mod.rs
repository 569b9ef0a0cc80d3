//! Cloud-specific access methods and signed URLs.
//!
//! Each platform gets one [`CloudSigner`]. The access-URL endpoint picks the
//! signer from the access id's prefix alone, so prefixes never overlap.

pub mod azure;
pub mod gcp;

use crate::{
    errors::{DrsError, DrsResult},
    models::{
        drs_object::{DrsAccessMethod, DrsAccessUrl},
        fs_item::FsFile,
        snapshot::{CloudPlatform, SnapshotCacheResult},
    },
    services::collaborators::AuthenticatedUser,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{sync::Arc, time::Duration};

/// Lifetime of every signed URL.
pub const URL_TTL: Duration = Duration::from_secs(15 * 60);

type HmacSha256 = Hmac<Sha256>;

/// One snapshot's view of a file, as seen by the caller.
pub struct MethodContext<'a> {
    pub file: &'a FsFile,
    pub snapshot: &'a SnapshotCacheResult,
    /// Billing representative, set only for global file ids.
    pub billing_snapshot: Option<&'a str>,
    pub user: Option<&'a AuthenticatedUser>,
    pub passport: bool,
}

/// A file to sign for, through the snapshot its access is billed to.
pub struct SignContext<'a> {
    pub file: &'a FsFile,
    pub snapshot: &'a SnapshotCacheResult,
    pub user: Option<&'a AuthenticatedUser>,
    /// Caller-supplied project that pays for egress.
    pub user_project: Option<&'a str>,
}

#[async_trait]
pub trait CloudSigner: Send + Sync {
    async fn access_methods(&self, ctx: &MethodContext<'_>) -> DrsResult<Vec<DrsAccessMethod>>;

    /// Read-only URL valid for [`URL_TTL`].
    async fn sign(&self, ctx: &SignContext<'_>) -> DrsResult<DrsAccessUrl>;
}

#[derive(Clone)]
pub struct CloudSigners {
    gcp: Arc<dyn CloudSigner>,
    azure: Arc<dyn CloudSigner>,
}

impl CloudSigners {
    pub fn new(gcp: Arc<dyn CloudSigner>, azure: Arc<dyn CloudSigner>) -> Self {
        Self { gcp, azure }
    }

    pub fn for_platform(&self, platform: CloudPlatform) -> &dyn CloudSigner {
        match platform {
            CloudPlatform::Gcp => self.gcp.as_ref(),
            CloudPlatform::Azure => self.azure.as_ref(),
        }
    }
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> DrsResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|err| DrsError::SigningFailure(err.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// RFC 3986 percent-encoding of everything outside the unreserved set.
/// `/` survives only when `keep_slash` is set.
pub(crate) fn uri_encode(input: &str, keep_slash: bool) -> String {
    if keep_slash {
        input
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    } else {
        urlencoding::encode(input).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_encode_escapes_reserved_bytes() {
        assert_eq!(uri_encode("a b/c~d", true), "a%20b/c~d");
        assert_eq!(uri_encode("a b/c~d", false), "a%20b%2Fc~d");
        assert_eq!(uri_encode("é*", false), "%C3%A9%2A");
    }
}
