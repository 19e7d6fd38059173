use crate::models::{CollectionSchema, IndexRecord};
use crate::store::StoreHit;
use crate::IndexError;
use async_trait::async_trait;

/// Storage primitives of one named collection.
///
/// A build calls `recreate`, then `insert` once per batch, then `seal`. Until `seal`
/// succeeds the new records must not be served as a complete collection; `discard`
/// abandons a build that failed part-way.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn collection_name(&self) -> &str;

    /// Whether `search` can hand back stored vectors for maximal-marginal-relevance re-ranking.
    fn supports_mmr(&self) -> bool;

    async fn exists(&self) -> Result<bool, IndexError>;

    /// Drops any collection with this name and declares a fresh, empty one.
    async fn recreate(&self, schema: &CollectionSchema) -> Result<(), IndexError>;

    async fn insert(&self, records: &[IndexRecord]) -> Result<(), IndexError>;

    async fn seal(&self) -> Result<(), IndexError>;

    async fn discard(&self) -> Result<(), IndexError>;

    /// Top `limit` records by inner product, best first.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<StoreHit>, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;
}
