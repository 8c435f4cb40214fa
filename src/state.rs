use crate::config::AppConfig;
use crate::storage::{self, StorageClient};
use crate::store::{self, Store};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let store = store::connect(
            &config.database_url,
            config.db_wait_attempts,
            config.db_wait_interval,
        )
        .await?;
        let storage = storage::from_config(&config.storage).await?;
        Ok(Self {
            store,
            config,
            storage,
        })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with_storage(Arc::new(FakeStorage::default()))
    }

    #[cfg(test)]
    pub fn fake_with_storage(storage: Arc<dyn StorageClient>) -> Self {
        use crate::config::{JwtConfig, StorageConfig};
        use std::time::Duration;

        let config = Arc::new(AppConfig {
            database_url: "memory://".into(),
            db_wait_attempts: 1,
            db_wait_interval: Duration::from_millis(10),
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            storage: StorageConfig::Local {
                root: "fake".into(),
                url: "https://fake.local".into(),
            },
            upload_limit_bytes: 1024 * 1024,
        });

        Self {
            store: Arc::new(store::MemStore::default()),
            config,
            storage,
        }
    }
}

/// Keeps uploaded blobs in memory so tests can inspect them.
#[cfg(test)]
#[derive(Default)]
pub struct FakeStorage {
    pub objects: tokio::sync::Mutex<std::collections::HashMap<String, bytes::Bytes>>,
}

#[cfg(test)]
#[axum::async_trait]
impl StorageClient for FakeStorage {
    async fn put_object(&self, k: &str, b: bytes::Bytes, _ct: &str) -> anyhow::Result<()> {
        self.objects.lock().await.insert(k.to_string(), b);
        Ok(())
    }
    async fn delete_object(&self, k: &str) -> anyhow::Result<()> {
        self.objects.lock().await.remove(k);
        Ok(())
    }
    async fn presign_get(&self, k: &str, _s: u64) -> anyhow::Result<String> {
        Ok(format!("https://fake.local/{}", k))
    }
}
