use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Public host name used as the authority of issued DRS URIs.
    pub authority: String,
    /// Concurrent lookups allowed across the whole deployment.
    pub drs_lookup_max: usize,
    pub active_pod_count: usize,
    pub cache_ttl_secs: u64,
    /// Per-request deadline; 0 disables it.
    pub request_deadline_secs: u64,
    pub sam_url: String,
    pub ecm_url: String,
    pub ras_issuer: String,
    pub gcs_hmac_access_id: Option<String>,
    pub gcs_hmac_secret: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "GA4GH DRS resolver")]
pub struct Args {
    /// Host to bind to (overrides DRS_RESOLVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DRS_RESOLVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides DRS_RESOLVER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// DRS authority (overrides DRS_RESOLVER_AUTHORITY)
    #[arg(long)]
    pub authority: Option<String>,

    /// Deployment-wide cap on concurrent lookups (overrides DRS_RESOLVER_LOOKUP_MAX)
    #[arg(long)]
    pub drs_lookup_max: Option<usize>,

    /// Replicas sharing the lookup cap (overrides DRS_RESOLVER_ACTIVE_POD_COUNT)
    #[arg(long)]
    pub active_pod_count: Option<usize>,

    /// Snapshot cache TTL in seconds (overrides DRS_RESOLVER_CACHE_TTL_SECS)
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// Request deadline in seconds, 0 for none (overrides DRS_RESOLVER_REQUEST_DEADLINE_SECS)
    #[arg(long)]
    pub request_deadline_secs: Option<u64>,

    /// IAM service base URL (overrides DRS_RESOLVER_SAM_URL)
    #[arg(long)]
    pub sam_url: Option<String>,

    /// Passport verifier base URL (overrides DRS_RESOLVER_ECM_URL)
    #[arg(long)]
    pub ecm_url: Option<String>,

    /// Passport visa issuer (overrides DRS_RESOLVER_RAS_ISSUER)
    #[arg(long)]
    pub ras_issuer: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env_opt("DRS_RESOLVER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = env_or("DRS_RESOLVER_PORT", 8080u16)?;
        let env_db = env_opt("DRS_RESOLVER_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/drs_resolver.db".into());
        let env_authority = env_opt("DRS_RESOLVER_AUTHORITY").unwrap_or_else(|| "localhost".into());
        let env_lookup_max = env_or("DRS_RESOLVER_LOOKUP_MAX", 100usize)?;
        let env_pods = env_or("DRS_RESOLVER_ACTIVE_POD_COUNT", 1usize)?;
        let env_ttl = env_or("DRS_RESOLVER_CACHE_TTL_SECS", 15 * 60u64)?;
        let env_deadline = env_or("DRS_RESOLVER_REQUEST_DEADLINE_SECS", 0u64)?;
        let env_sam = env_opt("DRS_RESOLVER_SAM_URL").unwrap_or_else(|| "http://localhost:8081".into());
        let env_ecm = env_opt("DRS_RESOLVER_ECM_URL").unwrap_or_else(|| "http://localhost:8082".into());
        let env_issuer =
            env_opt("DRS_RESOLVER_RAS_ISSUER").unwrap_or_else(|| "https://stsstg.nih.gov".into());

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            authority: args.authority.unwrap_or(env_authority),
            drs_lookup_max: args.drs_lookup_max.unwrap_or(env_lookup_max),
            active_pod_count: args.active_pod_count.unwrap_or(env_pods),
            cache_ttl_secs: args.cache_ttl_secs.unwrap_or(env_ttl),
            request_deadline_secs: args.request_deadline_secs.unwrap_or(env_deadline),
            sam_url: args.sam_url.unwrap_or(env_sam),
            ecm_url: args.ecm_url.unwrap_or(env_ecm),
            ras_issuer: args.ras_issuer.unwrap_or(env_issuer),
            // secrets come from the environment only
            gcs_hmac_access_id: env_opt("DRS_RESOLVER_GCS_HMAC_ACCESS_ID"),
            gcs_hmac_secret: env_opt("DRS_RESOLVER_GCS_HMAC_SECRET"),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        (self.request_deadline_secs > 0).then(|| Duration::from_secs(self.request_deadline_secs))
    }
}
