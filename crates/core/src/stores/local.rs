use crate::models::{CollectionSchema, IndexRecord};
use crate::store::StoreHit;
use crate::traits::CollectionStore;
use crate::IndexError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

const DATA_FILE: &str = "collection.json";
const STAGING_FILE: &str = "collection.json.staging";

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    schema: CollectionSchema,
    created_at: DateTime<Utc>,
    records: Vec<IndexRecord>,
}

/// Embedded single-process store: one JSON file per collection under `root/<collection>/`.
///
/// A rebuild is staged in memory and written next to the live file; `seal` renames it over
/// the live file, so readers see either the previous collection or the complete new one.
pub struct LocalStore {
    root: PathBuf,
    collection: String,
    staged: Mutex<Option<CollectionFile>>,
    loaded: RwLock<Option<Arc<CollectionFile>>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            collection: collection.into(),
            staged: Mutex::new(None),
            loaded: RwLock::new(None),
        }
    }

    pub fn collection_dir(&self) -> PathBuf {
        self.root.join(&self.collection)
    }

    fn data_path(&self) -> PathBuf {
        self.collection_dir().join(DATA_FILE)
    }

    fn staging_path(&self) -> PathBuf {
        self.collection_dir().join(STAGING_FILE)
    }

    async fn collection(&self) -> Result<Arc<CollectionFile>, IndexError> {
        if let Some(file) = self.loaded.read().await.as_ref() {
            return Ok(Arc::clone(file));
        }

        let path = self.data_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(IndexError::NotFound(path.display().to_string()));
            }
            Err(error) => return Err(error.into()),
        };

        let file: Arc<CollectionFile> = Arc::new(serde_json::from_slice(&bytes)?);
        debug!(path = %path.display(), records = file.records.len(), "loaded local collection");
        *self.loaded.write().await = Some(Arc::clone(&file));
        Ok(file)
    }
}

async fn remove_if_present(path: &Path) -> Result<(), IndexError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

fn inner_product(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

#[async_trait]
impl CollectionStore for LocalStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn collection_name(&self) -> &str {
        &self.collection
    }

    fn supports_mmr(&self) -> bool {
        true
    }

    async fn exists(&self) -> Result<bool, IndexError> {
        Ok(tokio::fs::try_exists(self.data_path()).await?)
    }

    async fn recreate(&self, schema: &CollectionSchema) -> Result<(), IndexError> {
        *self.staged.lock().await = Some(CollectionFile {
            schema: schema.clone(),
            created_at: Utc::now(),
            records: Vec::new(),
        });
        Ok(())
    }

    async fn insert(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
        let mut staged = self.staged.lock().await;
        let file = staged.as_mut().ok_or_else(|| {
            IndexError::NotInitialized(format!(
                "collection '{}' was not recreated before insert",
                self.collection
            ))
        })?;

        for record in records {
            if record.embedding.len() != file.schema.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: file.schema.dimension,
                    actual: record.embedding.len(),
                });
            }
        }

        file.records.extend_from_slice(records);
        Ok(())
    }

    async fn seal(&self) -> Result<(), IndexError> {
        let file = self.staged.lock().await.take().ok_or_else(|| {
            IndexError::NotInitialized(format!(
                "collection '{}' has no staged build to seal",
                self.collection
            ))
        })?;

        tokio::fs::create_dir_all(self.collection_dir()).await?;
        let staging = self.staging_path();
        tokio::fs::write(&staging, serde_json::to_vec(&file)?).await?;
        tokio::fs::rename(&staging, self.data_path()).await?;

        *self.loaded.write().await = Some(Arc::new(file));
        Ok(())
    }

    async fn discard(&self) -> Result<(), IndexError> {
        *self.staged.lock().await = None;
        remove_if_present(&self.staging_path()).await
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<StoreHit>, IndexError> {
        let file = self.collection().await?;
        if vector.len() != file.schema.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: file.schema.dimension,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexRecord)> = file
            .records
            .iter()
            .map(|record| (inner_product(vector, &record.embedding), record))
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, record)| StoreHit {
                id: record.id.clone(),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                score,
                embedding: with_vectors.then(|| record.embedding.clone()),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.collection().await?.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexKind, Metric};
    use tempfile::tempdir;

    fn schema(dimension: usize) -> CollectionSchema {
        CollectionSchema {
            name: "notes".to_string(),
            dimension,
            text_max_chars: 100,
            metadata_max_chars: 100,
            metric: Metric::InnerProduct,
            index_kind: IndexKind::Flat,
        }
    }

    fn record(id: &str, embedding: Vec<f32>) -> IndexRecord {
        IndexRecord {
            id: id.to_string(),
            text: format!("text {id}"),
            embedding,
            metadata: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn sealed_collection_is_visible_to_a_fresh_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalStore::new(dir.path(), "notes");
        assert!(!store.exists().await?);

        store.recreate(&schema(2)).await?;
        store.insert(&[record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])]).await?;
        store.seal().await?;

        let reopened = LocalStore::new(dir.path(), "notes");
        assert!(reopened.exists().await?);
        assert_eq!(reopened.count().await?, 2);

        let hits = reopened.search(&[0.2, 0.9], 5, false).await?;
        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(hits[0].embedding.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unsealed_build_leaves_previous_collection_in_place() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalStore::new(dir.path(), "notes");
        store.recreate(&schema(2)).await?;
        store.insert(&[record("a", vec![1.0, 0.0])]).await?;
        store.seal().await?;

        store.recreate(&schema(2)).await?;
        store.insert(&[record("b", vec![0.0, 1.0])]).await?;
        let rejected = store.insert(&[record("c", vec![1.0])]).await;
        assert!(matches!(rejected, Err(IndexError::DimensionMismatch { .. })));
        store.discard().await?;

        assert_eq!(store.count().await?, 1);
        assert!(store.seal().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn missing_collection_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalStore::new(dir.path(), "absent");
        assert!(matches!(store.count().await, Err(IndexError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn search_returns_stored_vectors_on_request() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalStore::new(dir.path(), "notes");
        store.recreate(&schema(2)).await?;
        store.insert(&[record("a", vec![1.0, 0.0])]).await?;
        store.seal().await?;

        let hits = store.search(&[1.0, 0.0], 10, true).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].embedding.as_deref(), Some(&[1.0, 0.0][..]));
        Ok(())
    }
}
