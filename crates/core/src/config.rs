use crate::chunking::ChunkingConfig;
use crate::normalize::NormalizerConfig;
use std::path::PathBuf;

pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 64;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 100;

/// Which embedder a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible `/embeddings` service.
    #[default]
    OpenAi,
    /// Local hashed character n-grams, for offline runs.
    CharacterNgram,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "BAAI/bge-m3".to_string(),
            dimensions: 1024,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            timeout_secs: 60,
        }
    }
}

/// Where the collection lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexBackend {
    /// Embedded store persisted under a local directory.
    Local { persist_dir: PathBuf },
    /// Named collection on a Qdrant service.
    Qdrant { url: String, api_key: Option<String> },
}

impl IndexBackend {
    /// Human-readable location used in "knowledge base absent" messages.
    pub fn location(&self, collection: &str) -> String {
        match self {
            IndexBackend::Local { persist_dir } => {
                persist_dir.join(collection).display().to_string()
            }
            IndexBackend::Qdrant { url, .. } => format!("{url}/collections/{collection}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub collection: String,
    pub insert_batch_size: usize,
    pub text_max_chars: usize,
    pub metadata_max_chars: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Local {
                persist_dir: PathBuf::from("data_base/vector_db"),
            },
            collection: "exam_knowledge".to_string(),
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            text_max_chars: 8_192,
            metadata_max_chars: 4_096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "Qwen/Qwen3-8B".to_string(),
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

/// Everything a build or query run needs, assembled by the caller.
#[derive(Debug, Clone, Default)]
pub struct RagConfig {
    pub normalizer: NormalizerConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub chat: ChatConfig,
}
