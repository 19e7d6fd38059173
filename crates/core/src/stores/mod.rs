pub mod local;
pub mod qdrant;

pub use local::LocalStore;
pub use qdrant::QdrantStore;

use crate::config::{IndexBackend, IndexConfig};
use crate::models::{CollectionSchema, IndexRecord};
use crate::store::StoreHit;
use crate::traits::CollectionStore;
use crate::IndexError;
use async_trait::async_trait;

/// Backend chosen from [`IndexConfig::backend`].
pub enum AnyStore {
    Local(LocalStore),
    Qdrant(QdrantStore),
}

impl AnyStore {
    pub fn from_config(config: &IndexConfig, vector_size: usize) -> Self {
        match &config.backend {
            IndexBackend::Local { persist_dir } => {
                AnyStore::Local(LocalStore::new(persist_dir, &config.collection))
            }
            IndexBackend::Qdrant { url, api_key } => AnyStore::Qdrant(
                QdrantStore::new(url, &config.collection, vector_size).with_api_key(api_key.clone()),
            ),
        }
    }

    fn inner(&self) -> &dyn CollectionStore {
        match self {
            AnyStore::Local(store) => store,
            AnyStore::Qdrant(store) => store,
        }
    }
}

#[async_trait]
impl CollectionStore for AnyStore {
    fn backend_name(&self) -> &'static str {
        self.inner().backend_name()
    }

    fn collection_name(&self) -> &str {
        self.inner().collection_name()
    }

    fn supports_mmr(&self) -> bool {
        self.inner().supports_mmr()
    }

    async fn exists(&self) -> Result<bool, IndexError> {
        self.inner().exists().await
    }

    async fn recreate(&self, schema: &CollectionSchema) -> Result<(), IndexError> {
        self.inner().recreate(schema).await
    }

    async fn insert(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
        self.inner().insert(records).await
    }

    async fn seal(&self) -> Result<(), IndexError> {
        self.inner().seal().await
    }

    async fn discard(&self) -> Result<(), IndexError> {
        self.inner().discard().await
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<StoreHit>, IndexError> {
        self.inner().search(vector, limit, with_vectors).await
    }

    async fn count(&self) -> Result<usize, IndexError> {
        self.inner().count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn backend_follows_configuration() {
        let local = AnyStore::from_config(&IndexConfig::default(), 8);
        assert_eq!(local.backend_name(), "local");
        assert!(local.supports_mmr());

        let networked = AnyStore::from_config(
            &IndexConfig {
                backend: IndexBackend::Qdrant {
                    url: "http://localhost:6333".to_string(),
                    api_key: None,
                },
                ..IndexConfig::default()
            },
            8,
        );
        assert_eq!(networked.backend_name(), "qdrant");
        assert!(!networked.supports_mmr());
        assert_eq!(networked.collection_name(), "exam_knowledge");

        let custom = AnyStore::from_config(
            &IndexConfig {
                backend: IndexBackend::Local {
                    persist_dir: PathBuf::from("/tmp/kb"),
                },
                collection: "custom".to_string(),
                ..IndexConfig::default()
            },
            8,
        );
        assert_eq!(custom.collection_name(), "custom");
    }
}
