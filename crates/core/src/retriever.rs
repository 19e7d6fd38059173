use crate::embeddings::Embedder;
use crate::error::{IndexError, KnowledgeBaseError};
use crate::index::VectorIndex;
use crate::models::{RetrievedChunk, SearchStrategy};
use crate::traits::CollectionStore;
use tracing::debug;

/// Chunks retrieved for one question, most relevant first.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub question: String,
    pub chunks: Vec<RetrievedChunk>,
}

/// Answers questions from a knowledge base built earlier, attaching to it on first use.
pub struct Retriever<E, S> {
    index: VectorIndex<E, S>,
    location: String,
}

impl<E, S> Retriever<E, S>
where
    E: Embedder,
    S: CollectionStore,
{
    /// `location` names the knowledge base in the error raised when it is missing.
    pub fn new(index: VectorIndex<E, S>, location: impl Into<String>) -> Self {
        Self {
            index,
            location: location.into(),
        }
    }

    pub fn index(&self) -> &VectorIndex<E, S> {
        &self.index
    }

    pub fn supports_mmr(&self) -> bool {
        self.index.supports_mmr()
    }

    async fn attach(&mut self) -> Result<(), KnowledgeBaseError> {
        if self.index.is_attached() {
            return Ok(());
        }
        match self.index.load_existing().await {
            Ok(()) => Ok(()),
            Err(IndexError::NotFound(_)) => Err(KnowledgeBaseError::Absent(self.location.clone())),
            Err(error) => Err(error.into()),
        }
    }

    pub async fn query(
        &mut self,
        question: &str,
        k: usize,
        strategy: SearchStrategy,
    ) -> Result<Retrieval, KnowledgeBaseError> {
        self.attach().await?;
        let chunks = self.index.search(question, k, strategy).await?;
        debug!(k, returned = chunks.len(), ?strategy, "retrieved chunks");

        Ok(Retrieval {
            question: question.to_string(),
            chunks,
        })
    }

    pub async fn count(&mut self) -> Result<usize, KnowledgeBaseError> {
        self.attach().await?;
        Ok(self.index.collection_count().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::LocalStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_knowledge_base_is_reported_with_its_location() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::new(
            CharacterNgramEmbedder { dimensions: 16 },
            LocalStore::new(dir.path(), "absent"),
            &IndexConfig::default(),
        );
        let mut retriever = Retriever::new(index, "kb/absent");

        let error = retriever
            .query("什么是线性表", 3, SearchStrategy::Similarity)
            .await
            .unwrap_err();

        assert!(matches!(&error, KnowledgeBaseError::Absent(location) if location == "kb/absent"));
        assert!(error.to_string().contains("build it first"));
    }
}
