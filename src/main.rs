use anyhow::Result;
use axum::Router;
use drs_resolver::{
    config, db,
    models::drs_id::DrsIdCodec,
    routes,
    services::{
        admission::{AdmissionController, FixedPodCount},
        alias_registry::AliasRegistry,
        cache::MetadataCache,
        catalog::Catalog,
        collaborators::DelegatedUrlSigner,
        drs_service::{DrsService, DrsSettings},
        iam::SamClient,
        passport::EcmPassportClient,
        signers::{
            CloudSigners,
            azure::AzureSigner,
            gcp::{GcpSigner, GoogV4Signer},
        },
    },
};
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Timeout for calls to the IAM service and the passport verifier.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting drs-resolver for authority {} on {} (lookup max {}, pods {})",
        cfg.authority,
        cfg.addr(),
        cfg.drs_lookup_max,
        cfg.active_pod_count
    );

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let codec = DrsIdCodec::new(cfg.authority.clone());
    let catalog = Arc::new(Catalog::new(db.clone()));
    let sam = Arc::new(SamClient::new(cfg.sam_url.clone(), UPSTREAM_TIMEOUT)?);
    let passports = Arc::new(EcmPassportClient::new(
        cfg.ecm_url.clone(),
        cfg.ras_issuer.clone(),
        UPSTREAM_TIMEOUT,
    )?);

    let hmac = match (&cfg.gcs_hmac_access_id, &cfg.gcs_hmac_secret) {
        (Some(access_id), Some(secret)) => Some(GoogV4Signer::new(access_id.as_str(), secret.as_str())),
        _ => {
            tracing::warn!("No GCS HMAC key configured; GCS access URLs can only be delegated");
            None
        }
    };
    let delegated: Arc<dyn DelegatedUrlSigner> = sam.clone();
    let signers = CloudSigners::new(
        Arc::new(GcpSigner::new(catalog.clone(), hmac, Some(delegated), cfg.ras_issuer.clone())),
        Arc::new(AzureSigner::new(catalog.clone(), cfg.ras_issuer.clone())),
    );

    let service = DrsService {
        registry: AliasRegistry::new(db.clone(), codec.clone()),
        codec,
        snapshots: catalog.clone(),
        files: catalog,
        iam: sam,
        passports,
        signers,
        admission: Arc::new(AdmissionController::new(
            cfg.drs_lookup_max,
            Arc::new(FixedPodCount(cfg.active_pod_count)),
        )),
        caches: Arc::new(MetadataCache::new(cfg.cache_ttl())),
        settings: Arc::new(DrsSettings {
            ras_issuer: cfg.ras_issuer.clone(),
            request_deadline: cfg.request_deadline(),
        }),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
