use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding service returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("embedding service returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension {actual} does not match configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid embedding config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index not initialized: {0}")]
    NotInitialized(String),

    #[error("collection not found: {0}")]
    NotFound(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vector dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("record rejected by collection schema: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("chat service returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("chat service returned no choices")]
    EmptyResponse,
}

/// Stage of a knowledge base build, reported when the build aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Inspecting,
    Loading,
    Splitting,
    Dumping,
    Indexing,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BuildStage::Inspecting => "inspecting existing index",
            BuildStage::Loading => "loading documents",
            BuildStage::Splitting => "splitting documents",
            BuildStage::Dumping => "writing chunk dump",
            BuildStage::Indexing => "indexing chunks",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum KnowledgeBaseError {
    #[error("knowledge base not found at {0}; build it first")]
    Absent(String),

    #[error("knowledge base build failed while {stage}: {source}")]
    BuildFailed {
        stage: BuildStage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("answer generation failed: {0}")]
    Generation(#[from] AnswerError),
}

impl KnowledgeBaseError {
    pub fn build_failed<E>(stage: BuildStage, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BuildFailed {
            stage,
            source: Box::new(source),
        }
    }
}
