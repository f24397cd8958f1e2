use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::auth::password;
use crate::auth::repo::{MemoryUserStore, PgUserStore, UserStore};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    /// Verified against on logins for unknown emails.
    pub dummy_hash: Arc<str>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let users = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                tracing::info!("using postgres user store");
                Arc::new(open_pg_store(db).await?) as Arc<dyn UserStore>
            }
            None => {
                tracing::warn!("DATABASE_URL not set; users are kept in memory");
                Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>
            }
        };

        let dummy_hash = password::hash("laptop-shop-dummy".to_string())
            .await
            .context("build dummy password hash")?;

        Ok(Self::from_parts(users, Arc::new(config), dummy_hash.into()))
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        config: Arc<AppConfig>,
        dummy_hash: Arc<str>,
    ) -> Self {
        Self {
            users,
            config,
            dummy_hash,
        }
    }

    /// Development/test state. Hashes on the calling thread.
    pub fn in_memory(config: AppConfig) -> anyhow::Result<Self> {
        let dummy_hash = password::hash_password("laptop-shop-dummy")?;
        Ok(Self::from_parts(
            Arc::new(MemoryUserStore::new()),
            Arc::new(config),
            dummy_hash.into(),
        ))
    }
}

/// The unique email index lives in the migrations, so a store is only
/// handed out once they have run.
pub async fn open_pg_store(db: PgPool) -> anyhow::Result<PgUserStore> {
    let store = PgUserStore::new(db);
    store.migrate().await.context("run migrations")?;
    Ok(store)
}
