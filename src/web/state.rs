use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    chat::ChatHub,
    config::{AppConfig, StorageBackend},
    sentiment::SentimentClient,
    store::{MemoryStore, NewActivity, NewUser, PgStore, Role, Store, StoreError},
};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
    classifier: SentimentClient,
    hub: ChatHub,
    config: Arc<AppConfig>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn Store> = match config.storage {
            StorageBackend::Postgres => {
                let database_url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL env var is missing")?;
                Arc::new(PgStore::connect(database_url, config.database_max_connections).await?)
            }
            StorageBackend::Memory => {
                warn!("using in-memory storage, all data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_store(config, store)
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn Store>) -> Result<Self> {
        let classifier = SentimentClient::new(&config.sentiment)
            .context("failed to initialize sentiment client")?;

        Ok(Self {
            store,
            classifier,
            hub: ChatHub::default(),
            config: Arc::new(config),
        })
    }

    /// Creates the configured admin account when no admin exists yet.
    pub async fn ensure_seed_admin(&self) -> Result<()> {
        let Some(seed) = self.config.seed_admin.as_ref() else {
            if !self.store.has_admin().await? {
                warn!("no admin account exists; set SEED_ADMIN_EMAIL and SEED_ADMIN_PASSWORD");
            }
            return Ok(());
        };

        if self.store.has_admin().await? {
            return Ok(());
        }

        let password_hash = crate::web::auth::hash_password(&seed.password)
            .map_err(|err| anyhow!("failed to hash seed admin password: {err}"))?;

        let result = self
            .store
            .create_user(NewUser {
                first_name: "System".to_string(),
                last_name: "Admin".to_string(),
                email: seed.email.clone(),
                password_hash,
                role: Role::Admin,
                is_verified: true,
            })
            .await;

        match result {
            Ok(user) => {
                info!(email = %user.email, "seeded admin account");
                Ok(())
            }
            Err(StoreError::DuplicateEmail) => Err(anyhow!(
                "SEED_ADMIN_EMAIL {} already belongs to a non-admin account",
                seed.email
            )),
            Err(StoreError::Backend(err)) => Err(err.context("failed to insert seed admin user")),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn classifier(&self) -> &SentimentClient {
        &self.classifier
    }

    pub fn hub(&self) -> &ChatHub {
        &self.hub
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Best-effort audit trail; a failed write is logged and otherwise ignored.
    pub async fn record_activity(&self, user_id: Option<Uuid>, action: &str, details: Option<Value>) {
        let activity = NewActivity {
            user_id,
            action: action.to_string(),
            details,
        };

        if let Err(err) = self.store.record_activity(activity).await {
            error!(?err, action, "failed to record activity");
        }
    }
}

#[cfg(test)]
impl AppState {
    /// In-memory state wired to the given sentiment service settings.
    pub fn for_tests(sentiment: crate::config::SentimentSettings) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = AppConfig {
            sentiment,
            ..AppConfig::default()
        };
        let state = Self::with_store(config, store.clone()).unwrap();
        (state, store)
    }
}
