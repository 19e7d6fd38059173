use crate::config::IndexConfig;
use crate::embeddings::Embedder;
use crate::mmr::{mmr_select, MmrConfig};
use crate::models::{
    Chunk, CollectionSchema, IndexKind, IndexRecord, Metric, RetrievedChunk, SearchStrategy,
};
use crate::store::StoreHit;
use crate::traits::CollectionStore;
use crate::IndexError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Chunk index over one collection: embeds on the way in and on query, delegates storage to `S`.
pub struct VectorIndex<E, S> {
    embedder: E,
    store: S,
    insert_batch_size: usize,
    text_max_chars: usize,
    metadata_max_chars: usize,
    mmr: MmrConfig,
    attached: bool,
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => text[..offset].to_string(),
        None => text.to_string(),
    }
}

impl<E, S> VectorIndex<E, S>
where
    E: Embedder,
    S: CollectionStore,
{
    pub fn new(embedder: E, store: S, config: &IndexConfig) -> Self {
        Self {
            embedder,
            store,
            insert_batch_size: config.insert_batch_size.max(1),
            text_max_chars: config.text_max_chars,
            metadata_max_chars: config.metadata_max_chars,
            mmr: MmrConfig::default(),
            attached: false,
        }
    }

    pub fn with_mmr(mut self, mmr: MmrConfig) -> Self {
        self.mmr = mmr;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// False when `mmr_search` falls back to plain similarity search.
    pub fn supports_mmr(&self) -> bool {
        self.store.supports_mmr()
    }

    pub fn schema(&self) -> CollectionSchema {
        CollectionSchema {
            name: self.store.collection_name().to_string(),
            dimension: self.embedder.dimensions(),
            text_max_chars: self.text_max_chars,
            metadata_max_chars: self.metadata_max_chars,
            metric: Metric::InnerProduct,
            index_kind: IndexKind::Flat,
        }
    }

    fn ensure_attached(&self) -> Result<(), IndexError> {
        if self.attached {
            Ok(())
        } else {
            Err(IndexError::NotInitialized(format!(
                "collection '{}' has not been built or loaded",
                self.store.collection_name()
            )))
        }
    }

    fn records_for(
        &self,
        chunks: &[Chunk],
        embeddings: Vec<Vec<f32>>,
        texts: Vec<String>,
        metadata: Vec<String>,
    ) -> Result<Vec<IndexRecord>, IndexError> {
        if embeddings.len() != chunks.len() {
            return Err(IndexError::InvalidRecord(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let dimension = self.embedder.dimensions();
        embeddings
            .into_iter()
            .zip(texts)
            .zip(metadata)
            .map(|((embedding, text), metadata)| {
                if embedding.len() != dimension {
                    return Err(IndexError::DimensionMismatch {
                        expected: dimension,
                        actual: embedding.len(),
                    });
                }
                Ok(IndexRecord {
                    id: Uuid::new_v4().to_string(),
                    text,
                    embedding,
                    metadata,
                })
            })
            .collect()
    }

    /// Embeds every chunk, replaces the collection and bulk-inserts the records.
    ///
    /// All embedding and validation happens before the collection is touched.
    pub async fn create_from_documents(&mut self, chunks: &[Chunk]) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::InvalidRecord(
                "refusing to build an empty collection".to_string(),
            ));
        }

        let texts: Vec<String> = chunks
            .iter()
            .map(|chunk| truncate_chars(&chunk.content, self.text_max_chars))
            .collect();
        let metadata = chunks
            .iter()
            .map(|chunk| {
                let encoded = serde_json::to_string(&chunk.metadata)?;
                if encoded.chars().count() > self.metadata_max_chars {
                    return Err(IndexError::InvalidRecord(format!(
                        "metadata of {} chars exceeds limit {}",
                        encoded.chars().count(),
                        self.metadata_max_chars
                    )));
                }
                Ok(encoded)
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let embeddings = self.embedder.embed_documents(&texts).await?;
        let records = self.records_for(chunks, embeddings, texts, metadata)?;

        let schema = self.schema();
        self.attached = false;
        self.store.recreate(&schema).await?;

        if let Err(error) = self.insert_all(&records).await {
            if let Err(discard_error) = self.store.discard().await {
                warn!(%discard_error, "failed to discard partial collection");
            }
            return Err(error);
        }

        self.attached = true;
        info!(
            backend = self.store.backend_name(),
            collection = %schema.name,
            records = records.len(),
            dimension = schema.dimension,
            "collection built"
        );
        Ok(records.len())
    }

    async fn insert_all(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
        for (batch_index, batch) in records.chunks(self.insert_batch_size).enumerate() {
            self.store.insert(batch).await?;
            debug!(batch = batch_index, size = batch.len(), "inserted record batch");
        }
        self.store.seal().await
    }

    /// Attaches to a previously built collection without re-embedding.
    pub async fn load_existing(&mut self) -> Result<(), IndexError> {
        if !self.store.exists().await? {
            return Err(IndexError::NotFound(format!(
                "{} collection '{}'",
                self.store.backend_name(),
                self.store.collection_name()
            )));
        }
        self.attached = true;
        Ok(())
    }

    /// At most `k` chunks, most relevant first.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        self.ensure_attached()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(query).await?;
        let mut hits = self.store.search(&vector, k, false).await?;
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(k);
        hits.into_iter().map(StoreHit::into_retrieved).collect()
    }

    /// Diversity-aware search. Backends without [`supports_mmr`](Self::supports_mmr)
    /// fall back to [`similarity_search`](Self::similarity_search).
    pub async fn mmr_search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, IndexError> {
        self.ensure_attached()?;
        if !self.store.supports_mmr() {
            warn!(
                backend = self.store.backend_name(),
                "maximal marginal relevance unsupported, using similarity search"
            );
            return self.similarity_search(query, k).await;
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(query).await?;
        let hits = self.store.search(&vector, self.mmr.fetch_k(k), true).await?;

        let candidates = hits
            .iter()
            .map(|hit| {
                hit.embedding.clone().ok_or_else(|| IndexError::BackendResponse {
                    backend: self.store.backend_name().to_string(),
                    details: format!("hit {} returned without its vector", hit.id),
                })
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let order = mmr_select(&vector, &candidates, k, self.mmr.lambda);
        let mut slots: Vec<Option<StoreHit>> = hits.into_iter().map(Some).collect();
        order
            .into_iter()
            .filter_map(|position| slots.get_mut(position).and_then(Option::take))
            .map(StoreHit::into_retrieved)
            .collect()
    }

    pub async fn search(
        &self,
        query: &str,
        k: usize,
        strategy: SearchStrategy,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        match strategy {
            SearchStrategy::Similarity => self.similarity_search(query, k).await,
            SearchStrategy::Mmr => self.mmr_search(query, k).await,
        }
    }

    pub async fn collection_count(&self) -> Result<usize, IndexError> {
        self.ensure_attached()?;
        self.store.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{CollectionSchema, Document};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        batches: Mutex<Vec<usize>>,
        fail_on_batch: Option<usize>,
        discarded: Mutex<bool>,
        sealed: Mutex<bool>,
    }

    #[async_trait]
    impl CollectionStore for FakeStore {
        fn backend_name(&self) -> &'static str {
            "fake"
        }

        fn collection_name(&self) -> &str {
            "fake_collection"
        }

        fn supports_mmr(&self) -> bool {
            false
        }

        async fn exists(&self) -> Result<bool, IndexError> {
            Ok(*self.sealed.lock().unwrap())
        }

        async fn recreate(&self, _schema: &CollectionSchema) -> Result<(), IndexError> {
            self.batches.lock().unwrap().clear();
            Ok(())
        }

        async fn insert(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
            let mut batches = self.batches.lock().unwrap();
            if Some(batches.len()) == self.fail_on_batch {
                return Err(IndexError::BackendResponse {
                    backend: "fake".to_string(),
                    details: "insert rejected".to_string(),
                });
            }
            batches.push(records.len());
            Ok(())
        }

        async fn seal(&self) -> Result<(), IndexError> {
            *self.sealed.lock().unwrap() = true;
            Ok(())
        }

        async fn discard(&self) -> Result<(), IndexError> {
            *self.discarded.lock().unwrap() = true;
            Ok(())
        }

        async fn search(
            &self,
            _vector: &[f32],
            _limit: usize,
            _with_vectors: bool,
        ) -> Result<Vec<StoreHit>, IndexError> {
            Ok(vec![
                StoreHit {
                    id: "low".to_string(),
                    text: "low".to_string(),
                    metadata: "{}".to_string(),
                    score: 0.1,
                    embedding: None,
                },
                StoreHit {
                    id: "high".to_string(),
                    text: "high".to_string(),
                    metadata: "{}".to_string(),
                    score: 0.9,
                    embedding: None,
                },
            ])
        }

        async fn count(&self) -> Result<usize, IndexError> {
            Ok(self.batches.lock().unwrap().iter().sum())
        }
    }

    fn chunks(count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|n| Chunk {
                content: format!("第{n}块内容"),
                metadata: Document::new("", "doc.md").metadata,
            })
            .collect()
    }

    fn index(store: FakeStore) -> VectorIndex<CharacterNgramEmbedder, FakeStore> {
        VectorIndex::new(CharacterNgramEmbedder { dimensions: 16 }, store, &IndexConfig::default())
    }

    #[tokio::test]
    async fn records_are_inserted_in_bounded_batches() {
        let mut index = index(FakeStore::default());

        let inserted = index.create_from_documents(&chunks(250)).await.unwrap();

        assert_eq!(inserted, 250);
        assert_eq!(*index.store().batches.lock().unwrap(), vec![100, 100, 50]);
        assert_eq!(index.collection_count().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn failed_insert_discards_and_stays_unqueryable() {
        let mut index = index(FakeStore {
            fail_on_batch: Some(1),
            ..FakeStore::default()
        });

        let result = index.create_from_documents(&chunks(150)).await;

        assert!(result.is_err());
        assert!(*index.store().discarded.lock().unwrap());
        assert!(!index.is_attached());
        assert!(matches!(
            index.similarity_search("内容", 1).await,
            Err(IndexError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn oversized_metadata_is_rejected_before_the_store_is_touched() {
        let mut index = VectorIndex::new(
            CharacterNgramEmbedder { dimensions: 16 },
            FakeStore::default(),
            &IndexConfig {
                metadata_max_chars: 5,
                ..IndexConfig::default()
            },
        );

        let result = index.create_from_documents(&chunks(3)).await;

        assert!(matches!(result, Err(IndexError::InvalidRecord(_))));
        assert!(index.store().batches.lock().unwrap().is_empty());
        assert!(!*index.store().discarded.lock().unwrap());
    }

    #[tokio::test]
    async fn mmr_degrades_explicitly_when_backend_lacks_support() {
        let mut index = index(FakeStore::default());
        index.create_from_documents(&chunks(2)).await.unwrap();

        assert!(!index.supports_mmr());
        let results = index.mmr_search("内容", 5).await.unwrap();
        let texts: Vec<&str> = results.iter().map(|chunk| chunk.content.as_str()).collect();
        assert_eq!(texts, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn similarity_search_truncates_to_k() {
        let mut index = index(FakeStore::default());
        index.create_from_documents(&chunks(2)).await.unwrap();

        let results = index.similarity_search("内容", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "high");
    }

    #[test]
    fn text_is_truncated_on_char_boundaries() {
        assert_eq!(truncate_chars("操作系统", 2), "操作");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
