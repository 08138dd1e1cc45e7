//! Wiring of the dispatch pipeline from configuration.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use tidings_common::config::AppConfig;
use tidings_common::postgres::PgNotificationStore;
use tidings_common::redis_pool::create_redis_pool;
use tidings_common::store::{NotificationStore, PushChannel};
use tidings_engine::claims::{NoClaims, RedisSendClaims, SendClaims};
use tidings_engine::executor::DispatchExecutor;
use tidings_engine::orchestrator::ScanOrchestrator;
use tidings_engine::policy::PolicySet;
use tidings_engine::reactive::ReactiveDispatcher;

/// Everything the dispatcher runs, built once at startup.
pub struct Services {
    pub orchestrator: Arc<ScanOrchestrator>,
    pub reactive: Arc<ReactiveDispatcher>,
}

impl Services {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn NotificationStore>,
        push: Arc<dyn PushChannel>,
        claims: Arc<dyn SendClaims>,
    ) -> Self {
        let policies = PolicySet::from_config(config);
        let executor = Arc::new(DispatchExecutor::new(store.clone(), push, claims));

        let orchestrator = ScanOrchestrator::new(store.clone(), executor.clone(), policies.clone())
            .with_page_size(config.recipient_page_size)
            .with_concurrency(config.scan_concurrency);
        let reactive = ReactiveDispatcher::new(store, executor, policies);

        Self {
            orchestrator: Arc::new(orchestrator),
            reactive: Arc::new(reactive),
        }
    }

    /// Production wiring: Postgres store, optional Redis claims, given push channel.
    pub async fn connect(
        config: &AppConfig,
        pool: PgPool,
        push: Arc<dyn PushChannel>,
    ) -> anyhow::Result<Self> {
        let store: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(pool));

        let claims: Arc<dyn SendClaims> = match &config.redis_url {
            Some(url) => {
                let redis = create_redis_pool(url).await?;
                Arc::new(RedisSendClaims::new(
                    redis,
                    Duration::from_secs(config.send_claim_ttl_secs),
                ))
            }
            None => {
                tracing::info!("REDIS_URL not set; sending without per-record claims");
                Arc::new(NoClaims)
            }
        };

        Ok(Self::new(config, store, push, claims))
    }
}
