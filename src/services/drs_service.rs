//! DRS resolution engine.
//!
//! A lookup resolves the incoming id (aliases included), discovers the
//! snapshots the file is visible through, authorizes the caller against each of
//! them in parallel, fetches every authorized view in parallel and merges the
//! views into a single DRS object. Access URLs are issued from the same
//! resolution, signed through the snapshot the access is billed to.

use crate::{
    errors::{DrsError, DrsResult},
    models::{
        access_id::AccessId,
        drs_id::{DrsId, DrsIdCodec},
        drs_object::{
            DRS_OBJECT_VERSION, DrsAccessMethod, DrsAccessUrl, DrsAuthorizations, DrsChecksum,
            DrsContentsObject, DrsObject, DrsServiceInfo,
        },
        fs_item::{EXPAND_ALL, FsItem},
        snapshot::SnapshotCacheResult,
    },
    services::{
        admission::AdmissionController,
        alias_registry::AliasRegistry,
        billing,
        cache::MetadataCache,
        collaborators::{AccessVerifier, AuthenticatedUser, FileLookup, PassportVerifier, SnapshotSource},
        signers::{CloudSigners, MethodContext, SignContext},
    },
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHECKSUM_CRC32C: &str = "crc32c";
const CHECKSUM_MD5: &str = "md5";
/// Directories carry no content hash of their own.
const DIRECTORY_CRC32C: &str = "0";
const DEFAULT_DEPTH: i32 = 1;

/// How the caller proves access.
#[derive(Clone, Debug)]
pub enum DrsCredentials {
    Bearer(AuthenticatedUser),
    Passport(Vec<String>),
}

impl DrsCredentials {
    fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            DrsCredentials::Bearer(user) => Some(user),
            DrsCredentials::Passport(_) => None,
        }
    }

    fn is_passport(&self) -> bool {
        matches!(self, DrsCredentials::Passport(_))
    }
}

pub struct DrsSettings {
    /// Issuer advertised for passport authorization.
    pub ras_issuer: String,
    /// Upper bound on a whole request; unbounded when `None`.
    pub request_deadline: Option<Duration>,
}

#[derive(Clone)]
pub struct DrsService {
    pub codec: DrsIdCodec,
    pub registry: AliasRegistry,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub files: Arc<dyn FileLookup>,
    pub iam: Arc<dyn AccessVerifier>,
    pub passports: Arc<dyn PassportVerifier>,
    pub signers: CloudSigners,
    pub admission: Arc<AdmissionController>,
    pub caches: Arc<MetadataCache>,
    pub settings: Arc<DrsSettings>,
}

/// One authorized snapshot's view of the requested item.
struct SnapshotView {
    snapshot: SnapshotCacheResult,
    item: FsItem,
}

struct Resolved {
    drs_id: DrsId,
    views: Vec<SnapshotView>,
    object: DrsObject,
}

impl DrsService {
    /// Resolve an object id or alias into a merged DRS object.
    pub async fn lookup_object(&self, raw_id: &str, credentials: &DrsCredentials, expand: bool) -> DrsResult<DrsObject> {
        self.bounded(async {
            let _permit = self.admission.try_acquire()?;
            let depth = if expand { EXPAND_ALL } else { DEFAULT_DEPTH };
            let resolved = self.resolve(raw_id, credentials, depth).await?;
            info!(
                "resolved {} through {} snapshot(s)",
                resolved.drs_id,
                resolved.views.len()
            );
            Ok(resolved.object)
        })
        .await
    }

    /// Exchange one of the object's access ids for a signed URL.
    pub async fn get_access_url(
        &self,
        raw_id: &str,
        raw_access_id: &str,
        credentials: &DrsCredentials,
        user_project: Option<&str>,
    ) -> DrsResult<DrsAccessUrl> {
        self.bounded(async {
            let _permit = self.admission.try_acquire()?;
            let resolved = self.resolve(raw_id, credentials, DEFAULT_DEPTH).await?;

            let offered = resolved
                .object
                .access_methods
                .iter()
                .flatten()
                .any(|method| method.access_id.as_deref() == Some(raw_access_id));
            if !offered {
                return Err(DrsError::InvalidIdentifier(format!(
                    "No matching access ID {} was found on object {}",
                    raw_access_id, resolved.object.id
                )));
            }
            let access_id = AccessId::parse(raw_access_id)?;

            let view = match &access_id.billing_snapshot {
                Some(billing) => resolved
                    .views
                    .iter()
                    .find(|view| view.snapshot.id.to_string() == *billing)
                    .ok_or_else(|| {
                        DrsError::InvalidIdentifier(format!(
                            "access ID {} is billed to a snapshot that is not accessible",
                            raw_access_id
                        ))
                    })?,
                None => resolved
                    .views
                    .first()
                    .ok_or_else(|| DrsError::Internal("resolved object has no views".into()))?,
            };
            let FsItem::File(file) = &view.item else {
                return Err(DrsError::InvalidIdentifier(format!(
                    "object {} is a directory and has no access URL",
                    resolved.object.id
                )));
            };

            let start = Instant::now();
            let url = self
                .signers
                .for_platform(access_id.platform)
                .sign(&SignContext {
                    file,
                    snapshot: &view.snapshot,
                    user: credentials.user(),
                    user_project,
                })
                .await?;
            debug!("signing {} took {:?}", access_id, start.elapsed());
            info!(
                "issued access URL for {} via snapshot {} ({})",
                resolved.drs_id, view.snapshot.name, access_id
            );
            Ok(url)
        })
        .await
    }

    /// Authorization schemes accepted for an object.
    pub async fn lookup_authorizations(&self, raw_id: &str) -> DrsResult<DrsAuthorizations> {
        self.bounded(async {
            let _permit = self.admission.try_acquire()?;
            let drs_id = self.codec.resolve_incoming_id(raw_id, &self.registry).await?;
            let candidates = self.discover_snapshots(&drs_id).await?;

            for snapshot in &candidates {
                let summary = self
                    .caches
                    .summaries
                    .get_or_try_insert_with(snapshot.id, || self.snapshots.retrieve_summary(snapshot.id))
                    .await?;
                if summary.passport_criteria().is_some() {
                    return Ok(DrsAuthorizations::bearer_and_passport(self.settings.ras_issuer.as_str()));
                }
            }
            Ok(DrsAuthorizations::bearer())
        })
        .await
    }

    pub fn service_info(&self) -> DrsServiceInfo {
        DrsServiceInfo {
            version: "0.0.1".into(),
            title: "Terra Data Repository".into(),
            description: "GA4GH DRS resolver for snapshot files".into(),
            contact: format!("https://{}", self.codec.authority()),
            license: "Apache 2.0".into(),
        }
    }

    async fn bounded<T>(&self, work: impl Future<Output = DrsResult<T>>) -> DrsResult<T> {
        match self.settings.request_deadline {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| DrsError::DeadlineExceeded(limit))?,
            None => work.await,
        }
    }

    async fn resolve(&self, raw_id: &str, credentials: &DrsCredentials, depth: i32) -> DrsResult<Resolved> {
        let start = Instant::now();
        let drs_id = self.codec.resolve_incoming_id(raw_id, &self.registry).await?;

        let candidates = self.discover_snapshots(&drs_id).await?;
        debug!("discovered {} snapshot(s) for {} in {:?}", candidates.len(), drs_id, start.elapsed());

        let authorized = self.authorize(candidates, credentials).await?;
        debug!("authorized {} snapshot(s) for {} in {:?}", authorized.len(), drs_id, start.elapsed());

        let views = self.fetch_views(authorized, &drs_id.fs_object_id, depth).await?;
        debug!("fetched {} view(s) of {} in {:?}", views.len(), drs_id, start.elapsed());

        let representatives = if drs_id.is_global() {
            let pairs: Vec<(String, String)> = views
                .iter()
                .map(|view| (view.snapshot.id.to_string(), view.snapshot.billing_profile_id.to_string()))
                .collect();
            billing::attribute(pairs.iter().map(|(id, profile)| (id.as_str(), profile.as_str())))
        } else {
            HashMap::new()
        };

        let mut objects = Vec::with_capacity(views.len());
        for view in &views {
            let billing_snapshot = representatives.get(&view.snapshot.id.to_string()).map(String::as_str);
            objects.push(self.view_to_object(view, billing_snapshot, credentials).await?);
        }
        let object = merge_drs_objects(objects)?;
        debug!("resolved {} in {:?}", drs_id, start.elapsed());

        Ok(Resolved { drs_id, views, object })
    }

    /// Candidate snapshots for an id. Snapshots that no longer exist are skipped.
    async fn discover_snapshots(&self, drs_id: &DrsId) -> DrsResult<Vec<SnapshotCacheResult>> {
        let ids = match drs_id.snapshot_id {
            Some(snapshot_id) if !drs_id.is_global() => vec![snapshot_id],
            _ => self.registry.retrieve_referenced_snapshot_ids(drs_id).await?,
        };

        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            let cached = self
                .caches
                .snapshots
                .get_or_try_insert_with(id, || self.snapshots.retrieve_snapshot(id))
                .await;
            match cached {
                Ok(snapshot) => candidates.push(snapshot),
                Err(DrsError::SnapshotNotFound(missing)) => {
                    debug!("skipping missing snapshot {} for {}", missing, drs_id);
                }
                Err(err) => return Err(err),
            }
        }
        if candidates.is_empty() {
            return Err(DrsError::ObjectNotFound(drs_id.to_object_id()));
        }
        Ok(candidates)
    }

    /// Check every candidate in parallel and keep the ones the caller may read,
    /// ordered by snapshot id.
    async fn authorize(
        &self,
        candidates: Vec<SnapshotCacheResult>,
        credentials: &DrsCredentials,
    ) -> DrsResult<Vec<SnapshotCacheResult>> {
        let credentials = Arc::new(credentials.clone());
        let mut checks = JoinSet::new();
        for snapshot in candidates {
            let service = self.clone();
            let credentials = Arc::clone(&credentials);
            checks.spawn(async move {
                let outcome = service.authorize_one(snapshot.id, &credentials).await;
                (snapshot, outcome)
            });
        }

        let mut authorized = Vec::new();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((snapshot, Ok(()))) => authorized.push(snapshot),
                Ok((snapshot, Err(err))) => {
                    warn!("caller not authorized for snapshot {}: {}", snapshot.name, err);
                }
                Err(err) => warn!("authorization task failed: {}", err),
            }
        }

        if authorized.is_empty() {
            return Err(DrsError::Forbidden(
                "No snapshots containing this object are accessible to the caller".into(),
            ));
        }
        authorized.sort_by_key(|snapshot| snapshot.id.to_string());
        Ok(authorized)
    }

    async fn authorize_one(&self, snapshot_id: Uuid, credentials: &DrsCredentials) -> DrsResult<()> {
        match credentials {
            DrsCredentials::Bearer(user) => self.iam.verify_snapshot_read(user, snapshot_id).await,
            DrsCredentials::Passport(passports) => {
                let summary = self
                    .caches
                    .summaries
                    .get_or_try_insert_with(snapshot_id, || self.snapshots.retrieve_summary(snapshot_id))
                    .await?;
                self.passports.verify_passports(&summary, passports).await
            }
        }
    }

    /// Load the item from every authorized snapshot in parallel. Any failure
    /// fails the request and aborts the remaining lookups.
    async fn fetch_views(
        &self,
        authorized: Vec<SnapshotCacheResult>,
        fs_object_id: &str,
        depth: i32,
    ) -> DrsResult<Vec<SnapshotView>> {
        let mut lookups = JoinSet::new();
        for (index, snapshot) in authorized.into_iter().enumerate() {
            let service = self.clone();
            let fs_object_id = fs_object_id.to_string();
            lookups.spawn(async move {
                let project = service
                    .caches
                    .projects
                    .get_or_try_insert_with(snapshot.id, || service.snapshots.retrieve_project(snapshot.id))
                    .await?;
                let item = service.files.lookup_fs_item(&project, &fs_object_id, depth).await?;
                Ok::<_, DrsError>((index, SnapshotView { snapshot, item }))
            });
        }

        let mut views = Vec::with_capacity(lookups.len());
        while let Some(joined) = lookups.join_next().await {
            let view = joined.map_err(|err| DrsError::Internal(format!("file lookup task failed: {}", err)))??;
            views.push(view);
        }
        views.sort_by_key(|(index, _)| *index);
        Ok(views.into_iter().map(|(_, view)| view).collect())
    }

    async fn view_to_object(
        &self,
        view: &SnapshotView,
        billing_snapshot: Option<&str>,
        credentials: &DrsCredentials,
    ) -> DrsResult<DrsObject> {
        let common = view.item.common();
        let drs_id = self
            .codec
            .make_drs_id(&common.file_id, view.snapshot.id, view.snapshot.global_file_ids);

        let mut object = DrsObject {
            id: drs_id.to_object_id(),
            name: view.item.name().to_string(),
            self_uri: drs_id.to_uri()?,
            size: 0,
            created_time: common.created_date,
            updated_time: common.created_date,
            version: DRS_OBJECT_VERSION.to_string(),
            mime_type: None,
            description: common.description.clone(),
            checksums: Vec::new(),
            access_methods: None,
            contents: None,
            aliases: vec![common.path.clone()],
        };

        match &view.item {
            FsItem::File(file) => {
                object.size = common.size;
                object.mime_type = file.mime_type.clone();
                if let Some(crc) = &common.checksum_crc32c {
                    object.checksums.push(DrsChecksum::new(CHECKSUM_CRC32C, crc.as_str()));
                }
                if let Some(md5) = &common.checksum_md5 {
                    object.checksums.push(DrsChecksum::new(CHECKSUM_MD5, md5.as_str()));
                }
                let methods = self
                    .signers
                    .for_platform(file.cloud_platform)
                    .access_methods(&MethodContext {
                        file,
                        snapshot: &view.snapshot,
                        billing_snapshot,
                        user: credentials.user(),
                        passport: credentials.is_passport(),
                    })
                    .await?;
                object.access_methods = Some(methods);
            }
            FsItem::Dir(dir) => {
                object.checksums.push(DrsChecksum::new(CHECKSUM_CRC32C, DIRECTORY_CRC32C));
                let contents = dir
                    .contents
                    .iter()
                    .map(|child| self.contents_entry(child, &view.snapshot))
                    .collect::<DrsResult<Vec<_>>>()?;
                object.contents = Some(contents);
            }
        }
        Ok(object)
    }

    fn contents_entry(&self, item: &FsItem, snapshot: &SnapshotCacheResult) -> DrsResult<DrsContentsObject> {
        let drs_id = self
            .codec
            .make_drs_id(item.file_id(), snapshot.id, snapshot.global_file_ids);
        let contents = match item {
            FsItem::Dir(dir) if dir.enumerated => Some(
                dir.contents
                    .iter()
                    .map(|child| self.contents_entry(child, snapshot))
                    .collect::<DrsResult<Vec<_>>>()?,
            ),
            _ => None,
        };
        Ok(DrsContentsObject {
            name: item.name().to_string(),
            id: drs_id.to_object_id(),
            drs_uri: vec![drs_id.to_uri()?],
            contents,
        })
    }
}

/// Fold a set of values that must all be equal into the single value.
fn agree<T: Ord + Clone>(field: &str, values: impl IntoIterator<Item = T>, render: impl Fn(&T) -> String) -> DrsResult<T> {
    let distinct: BTreeSet<T> = values.into_iter().collect();
    let mut iter = distinct.iter();
    match (iter.next(), iter.next()) {
        (Some(only), None) => Ok(only.clone()),
        (None, _) => Err(DrsError::Internal(format!("no values for `{}`", field))),
        _ => Err(DrsError::inconsistent(field, distinct.iter().map(render))),
    }
}

fn render_optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "<none>".to_string())
}

/// Union directory listings keyed by object id. Entries sharing an id must
/// agree on their name; their URIs and nested listings are unioned.
fn merge_contents(entries: Vec<DrsContentsObject>) -> DrsResult<Vec<DrsContentsObject>> {
    let mut by_id: BTreeMap<String, Vec<DrsContentsObject>> = BTreeMap::new();
    for entry in entries {
        by_id.entry(entry.id.clone()).or_default().push(entry);
    }

    let mut merged = by_id
        .into_iter()
        .map(|(id, group)| {
            let name = agree(
                &format!("contents.{}.name", id),
                group.iter().map(|c| c.name.clone()),
                String::clone,
            )?;
            let drs_uri: BTreeSet<String> = group.iter().flat_map(|c| c.drs_uri.iter().cloned()).collect();
            let nested: Vec<Vec<DrsContentsObject>> = group.into_iter().filter_map(|c| c.contents).collect();
            let contents = if nested.is_empty() {
                None
            } else {
                Some(merge_contents(nested.into_iter().flatten().collect())?)
            };
            Ok(DrsContentsObject {
                name,
                id,
                drs_uri: drs_uri.into_iter().collect(),
                contents,
            })
        })
        .collect::<DrsResult<Vec<_>>>()?;
    merged.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    Ok(merged)
}

/// Merge per-snapshot views of one object.
///
/// Scalar fields must agree, times widen to the earliest creation and latest
/// update, and list fields are unioned and sorted, so the result does not
/// depend on the order of `objects`.
pub fn merge_drs_objects(objects: Vec<DrsObject>) -> DrsResult<DrsObject> {
    if objects.is_empty() {
        return Err(DrsError::Internal("no DRS objects to merge".into()));
    }

    let id = agree("id", objects.iter().map(|o| o.id.clone()), String::clone)?;
    let name = agree("name", objects.iter().map(|o| o.name.clone()), String::clone)?;
    let description = agree("description", objects.iter().map(|o| o.description.clone()), render_optional)?;
    let size = agree("size", objects.iter().map(|o| o.size), i64::to_string)?;
    let self_uri = agree("self_uri", objects.iter().map(|o| o.self_uri.clone()), String::clone)?;
    let mime_type = agree("mime_type", objects.iter().map(|o| o.mime_type.clone()), render_optional)?;
    let version = agree("version", objects.iter().map(|o| o.version.clone()), String::clone)?;

    let created_time = objects.iter().map(|o| o.created_time).min().unwrap_or_default();
    let updated_time = objects.iter().map(|o| o.updated_time).max().unwrap_or_default();

    let checksums: BTreeSet<DrsChecksum> = objects.iter().flat_map(|o| o.checksums.iter().cloned()).collect();
    let mut by_type: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for checksum in &checksums {
        by_type
            .entry(checksum.checksum_type.as_str())
            .or_default()
            .push(checksum.checksum.clone());
    }
    if let Some((checksum_type, values)) = by_type.iter().find(|(_, values)| values.len() > 1) {
        return Err(DrsError::inconsistent(format!("checksums.{}", checksum_type), values.clone()));
    }

    let aliases: BTreeSet<String> = objects.iter().flat_map(|o| o.aliases.iter().cloned()).collect();

    let directories = objects.iter().filter(|o| o.is_directory()).count();
    let (access_methods, contents) = if directories == objects.len() {
        let contents = merge_contents(
            objects
                .iter()
                .flat_map(|o| o.contents.iter().flatten().cloned())
                .collect(),
        )?;
        (None, Some(contents))
    } else if directories == 0 {
        let mut methods: Vec<DrsAccessMethod> = objects
            .iter()
            .flat_map(|o| o.access_methods.iter().flatten().cloned())
            .collect();
        methods.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        methods.dedup();
        (Some(methods), None)
    } else {
        return Err(DrsError::inconsistent(
            "access_methods",
            ["file".to_string(), "directory".to_string()],
        ));
    };

    Ok(DrsObject {
        id,
        name,
        self_uri,
        size,
        created_time,
        updated_time,
        version,
        mime_type,
        description,
        checksums: checksums.into_iter().collect(),
        access_methods,
        contents,
        aliases: aliases.into_iter().collect(),
    })
}
