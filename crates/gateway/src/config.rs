use std::env;
use std::time::Duration;

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Shared,
}

impl Backend {
    fn from_env(name: &str) -> Self {
        match env::var(name).ok().as_deref() {
            Some("shared") => Backend::Shared,
            _ => Backend::Memory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBackend {
    Auth0,
    Descope,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageMetering {
    Null,
    Metric,
    OpenMeter,
}

/// Process-wide configuration, read once from the environment at startup.
///
/// Mirrors the env surface in spec §6; every field has the default the spec
/// names. `REDIS_URL` is required only when `cache_backend`/`queue_backend`/
/// meter store are `Backend::Shared`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub oidc_issuer: String,
    pub oidc_audience: String,
    pub auth_backend: AuthBackend,
    pub enable_descope_exchange: bool,
    pub descope_project_id: Option<String>,
    pub descope_client_id: Option<String>,
    pub descope_client_secret: Option<String>,
    pub descope_base_url: String,
    pub descope_aud: Option<String>,
    pub jwks_refresh_secs: u64,
    pub leeway_secs: u64,

    pub engine_url: String,
    pub engine_timeout: Duration,

    pub cache_backend: Backend,
    pub queue_backend: Backend,
    pub redis_url: Option<String>,

    pub max_tokens_per_min: u64,
    pub quota_window_secs: u64,
    pub quota_encoding: String,

    pub usage_metering: UsageMetering,
    pub openmeter_url: Option<String>,
    pub openmeter_api_key: Option<String>,

    pub task_ttl_secs: u64,
    pub task_forward_timeout: Duration,
    pub task_default_target: String,

    pub cors_allowed_origins: Vec<String>,

    pub auth0_domain: Option<String>,
    pub auth0_client: Option<String>,

    pub max_request_body_bytes: usize,
}

impl GatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let oidc_issuer =
            env::var("OIDC_ISSUER").map_err(|_| anyhow::anyhow!("OIDC_ISSUER must be set"))?;
        let oidc_audience =
            env::var("OIDC_AUD").map_err(|_| anyhow::anyhow!("OIDC_AUD must be set"))?;

        let auth_backend = match env::var("AUTH_BACKEND").ok().as_deref() {
            Some("descope") => AuthBackend::Descope,
            Some("mixed") => AuthBackend::Mixed,
            _ => AuthBackend::Auth0,
        };

        let enable_descope_exchange = env_flag("ENABLE_DESCOPE_EXCHANGE");

        let usage_metering = match env::var("USAGE_METERING") {
            Ok(v) => parse_usage_metering(&v),
            Err(_) => {
                if let Ok(legacy) = env::var("USAGE_BACKEND") {
                    tracing::warn!("USAGE_BACKEND is deprecated; rename to USAGE_METERING");
                    parse_usage_metering(&legacy)
                } else {
                    UsageMetering::Null
                }
            }
        };

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            oidc_issuer,
            oidc_audience,
            auth_backend,
            enable_descope_exchange,
            descope_project_id: env::var("DESCOPE_PROJECT_ID").ok(),
            descope_client_id: env::var("DESCOPE_CLIENT_ID").ok(),
            descope_client_secret: env::var("DESCOPE_CLIENT_SECRET").ok(),
            descope_base_url: env::var("DESCOPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.descope.com".to_string()),
            descope_aud: env::var("DESCOPE_AUD").ok(),
            jwks_refresh_secs: env_u64("JWKS_REFRESH_SECS", 600),
            leeway_secs: env_u64("OIDC_LEEWAY_SECS", 60),

            engine_url: env::var("ENGINE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            engine_timeout: Duration::from_secs(env_u64("ENGINE_TIMEOUT_SECS", 60)),

            cache_backend: Backend::from_env("CACHE_BACKEND"),
            queue_backend: Backend::from_env("QUEUE_BACKEND"),
            redis_url: env::var("REDIS_URL").ok(),

            max_tokens_per_min: env_u64("MAX_TOKENS_PER_MIN", 60_000),
            quota_window_secs: env_u64("QUOTA_WINDOW_SECS", 60),
            quota_encoding: env::var("QUOTA_ENCODING")
                .unwrap_or_else(|_| "cl100k_base".to_string()),

            usage_metering,
            openmeter_url: env::var("OPENMETER_URL").ok(),
            openmeter_api_key: env::var("OPENMETER_API_KEY").ok(),

            task_ttl_secs: env_u64("TASK_TTL_SECS", 3600),
            task_forward_timeout: Duration::from_secs(env_u64("TASK_FORWARD_TIMEOUT_SECS", 60)),
            task_default_target: env::var("TASK_DEFAULT_TARGET")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/api/chat".to_string()),

            cors_allowed_origins,

            auth0_domain: env::var("AUTH0_DOMAIN").ok(),
            auth0_client: env::var("AUTH0_CLIENT").ok(),

            max_request_body_bytes: env::var("MAX_REQUEST_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024),
        })
    }
}

fn parse_usage_metering(v: &str) -> UsageMetering {
    match v.to_ascii_lowercase().as_str() {
        "metric" => UsageMetering::Metric,
        "openmeter" => UsageMetering::OpenMeter,
        _ => UsageMetering::Null,
    }
}
