use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::db::Store;
use crate::services::{AuthService, SeaOrmAuthService};
use crate::token::TokenCodec;

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    /// Signing key and TTLs, immutable after startup
    pub codec: Arc<TokenCodec>,

    pub auth_service: Arc<dyn AuthService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let codec = Arc::new(
            TokenCodec::from_config(&config.auth)
                .map_err(|e| anyhow::anyhow!("Failed to initialize token codec: {e}"))?,
        );

        let auth_service = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            codec.clone(),
            config.security.clone(),
            config.auth.revoke_tokens_on_password_change,
        )) as Arc<dyn AuthService>;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            codec,
            auth_service,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
