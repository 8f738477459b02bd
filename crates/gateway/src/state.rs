use std::sync::Arc;
use std::time::Duration;

use crate::cache::{MemoryCache, RedisCache, ResponseCache};
use crate::config::{AuthBackend, Backend, GatewayConfig, UsageMetering};
use crate::exchange::ExchangeClient;
use crate::memory_backend::{self, MemoryBackend};
use crate::meter::{InMemoryMeterStore, MeterStore, RedisMeterStore};
use crate::oidc::OidcValidator;
use crate::queue::{JobQueue, MemoryQueue, RedisQueue};
use crate::tasks::TaskRegistry;
use crate::token_encoder::TokenEncoder;
use crate::usage::{ExternalUsageSink, MetricUsageSink, NullUsageSink, UsageSink};

/// Shared application state, owned by the process and handed to every
/// handler/middleware via axum's `State` extractor. Constructed once at
/// startup with explicit init (the core spec models this as an
/// application-instance-owned component set, not ambient globals).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub http: reqwest::Client,
    pub oidc: OidcValidator,
    pub exchange_oidc: Option<OidcValidator>,
    pub exchange: Option<ExchangeClient>,
    pub meter: Arc<dyn MeterStore>,
    pub cache: Arc<dyn ResponseCache>,
    pub queue: Arc<dyn JobQueue>,
    pub usage: Arc<dyn UsageSink>,
    pub metric_sink: Option<Arc<MetricUsageSink>>,
    pub tasks: TaskRegistry,
    pub memory_backend: Arc<dyn MemoryBackend>,
    pub encoder: Arc<TokenEncoder>,
}

impl AppState {
    pub async fn build(config: GatewayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let oidc = OidcValidator::discover(
            http.clone(),
            &config.oidc_issuer,
            &config.oidc_audience,
            config.leeway_secs,
            config.jwks_refresh_secs,
            None,
        )
        .await?;

        let (exchange_oidc, exchange) = if config.enable_descope_exchange
            && matches!(config.auth_backend, AuthBackend::Descope | AuthBackend::Mixed)
        {
            let project_id = config
                .descope_project_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DESCOPE_PROJECT_ID required when exchange is enabled"))?;
            let client_secret = config
                .descope_client_secret
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DESCOPE_CLIENT_SECRET required when exchange is enabled"))?;
            let descope_issuer = format!("{}/v1/apps/{project_id}", config.descope_base_url);
            let jwks_uri = format!("{}/v2/keys/{project_id}", config.descope_base_url);

            let exchange_oidc = OidcValidator::discover(
                http.clone(),
                &descope_issuer,
                config.descope_aud.as_deref().unwrap_or(&config.oidc_audience),
                config.leeway_secs,
                config.jwks_refresh_secs,
                Some(&jwks_uri),
            )
            .await?;

            let exchange = ExchangeClient::new(
                http.clone(),
                format!("{}/oauth2/v1/token", config.descope_base_url),
                config.descope_client_id.clone().unwrap_or_default(),
                client_secret,
                descope_issuer,
            );

            (Some(exchange_oidc), Some(exchange))
        } else {
            (None, None)
        };

        // The meter store has no dedicated `METER_BACKEND` env var (spec §6);
        // it shares Redis with whichever of cache/queue is configured shared,
        // since a distributed deployment needs distributed accounting
        // regardless of which backend tripped over into `shared` first.
        let meter_shared =
            config.cache_backend == Backend::Shared || config.queue_backend == Backend::Shared;
        let meter: Arc<dyn MeterStore> = if meter_shared {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("REDIS_URL required for shared meter store"))?;
            Arc::new(RedisMeterStore::connect(url, config.quota_window_secs).await?)
        } else {
            Arc::new(InMemoryMeterStore::new(config.quota_window_secs))
        };

        let cache: Arc<dyn ResponseCache> = match config.cache_backend {
            Backend::Memory => Arc::new(MemoryCache::new()),
            Backend::Shared => {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("REDIS_URL required for shared cache"))?;
                Arc::new(RedisCache::connect(url).await?)
            }
        };

        let queue: Arc<dyn JobQueue> = match config.queue_backend {
            Backend::Memory => Arc::new(MemoryQueue::new()),
            Backend::Shared => {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("REDIS_URL required for shared queue"))?;
                Arc::new(RedisQueue::connect(url).await?)
            }
        };

        let mut metric_sink: Option<Arc<MetricUsageSink>> = None;
        let usage: Arc<dyn UsageSink> = match config.usage_metering {
            UsageMetering::Null => Arc::new(NullUsageSink),
            UsageMetering::Metric => {
                let sink = Arc::new(MetricUsageSink::new());
                metric_sink = Some(sink.clone());
                sink
            }
            UsageMetering::OpenMeter => {
                let url = config
                    .openmeter_url
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("OPENMETER_URL required for openmeter usage metering"))?;
                Arc::new(ExternalUsageSink::new(
                    http.clone(),
                    url,
                    config.openmeter_api_key.clone(),
                ))
            }
        };

        let memory_backend: Arc<dyn MemoryBackend> =
            Arc::from(memory_backend::from_env_name(
                std::env::var("MEM_BACKEND").unwrap_or_else(|_| "none".to_string()).as_str(),
            ));

        let encoder = Arc::new(TokenEncoder::resolve(&config.quota_encoding));
        let task_ttl = Duration::from_secs(config.task_ttl_secs);

        Ok(Self {
            config: Arc::new(config),
            http,
            oidc,
            exchange_oidc,
            exchange,
            meter,
            cache,
            queue,
            usage,
            metric_sink,
            tasks: TaskRegistry::new(task_ttl),
            memory_backend,
            encoder,
        })
    }
}
