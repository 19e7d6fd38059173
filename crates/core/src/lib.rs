pub mod answer;
pub mod builder;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod loader;
pub mod mmr;
pub mod models;
pub mod normalize;
pub mod retriever;
pub mod store;
pub mod stores;
pub mod traits;

pub use answer::{build_prompt, ChatClient, SYSTEM_PROMPT};
pub use builder::{BuildOptions, BuildReport, BuildState, KnowledgeBaseBuilder};
pub use chunking::{
    ChunkingConfig, HeadingSplitter, RecursiveSplitter, SplitStrategy, TextSplitter,
};
pub use config::{
    ChatConfig, EmbeddingConfig, EmbeddingProviderKind, IndexBackend, IndexConfig, RagConfig,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingProvider, OpenAiEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    AnswerError, BuildStage, EmbeddingError, IndexError, IngestError, KnowledgeBaseError,
};
pub use index::VectorIndex;
pub use loader::{DirectoryLoader, DocumentSource, LoadReport, LoaderKind, SkippedFile};
pub use mmr::MmrConfig;
pub use models::{
    Chunk, CollectionSchema, Document, IndexRecord, Metadata, MetadataValue, RetrievedChunk,
    SearchStrategy,
};
pub use normalize::{normalize, NormalizerConfig};
pub use retriever::{Retrieval, Retriever};
pub use stores::{AnyStore, LocalStore, QdrantStore};
pub use traits::CollectionStore;
