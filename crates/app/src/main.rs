use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use exam_rag_core::{
    AnyStore, BuildOptions, ChatClient, ChatConfig, ChunkingConfig, DirectoryLoader, Embedder,
    EmbeddingConfig, EmbeddingProvider, EmbeddingProviderKind, IndexBackend, IndexConfig,
    KnowledgeBaseBuilder, MmrConfig, NormalizerConfig, RagConfig, Retrieval, Retriever,
    SearchStrategy, SplitStrategy, TextSplitter, VectorIndex,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "exam-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base URL of the OpenAI-compatible service used for embeddings and answers.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    base_url: String,

    /// API key for the OpenAI-compatible service.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Embedding model name.
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "BAAI/bge-m3")]
    embedding_model: String,

    /// Vector dimension produced by the embedding model.
    #[arg(long, default_value = "1024")]
    embedding_dimensions: usize,

    /// Texts per embedding request.
    #[arg(long, default_value = "64")]
    embedding_batch_size: usize,

    /// Use the local character n-gram embedder instead of the embedding service.
    #[arg(long, default_value_t = false)]
    offline_embedder: bool,

    /// Chat model used by `ask`.
    #[arg(long, env = "LLM_MODEL_NAME", default_value = "Qwen/Qwen3-8B")]
    chat_model: String,

    /// Sampling temperature used by `ask`.
    #[arg(long, default_value = "0.7")]
    temperature: f32,

    /// Directory holding locally persisted collections.
    #[arg(long, default_value = "data_base/vector_db")]
    persist_dir: PathBuf,

    /// Qdrant base URL. When set, collections live on Qdrant instead of `--persist-dir`.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant API key.
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// Collection name.
    #[arg(long, default_value = "exam_knowledge")]
    collection: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Recursive,
    Section,
    Chapter,
}

impl From<StrategyArg> for SplitStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Recursive => SplitStrategy::Recursive,
            StrategyArg::Section => SplitStrategy::Section,
            StrategyArg::Chapter => SplitStrategy::Chapter,
        }
    }
}

#[derive(Args)]
struct ChunkArgs {
    /// How documents are cut into chunks.
    #[arg(long, value_enum, default_value = "recursive")]
    strategy: StrategyArg,

    /// Maximum chunk length in characters.
    #[arg(long, default_value = "500")]
    chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[arg(long, default_value = "50")]
    chunk_overlap: usize,

    /// Keep ASCII spaces during normalization (for text with word spacing).
    #[arg(long, default_value_t = false)]
    keep_spaces: bool,
}

#[derive(Args)]
struct QuestionArgs {
    /// The question to retrieve context for.
    #[arg(long)]
    question: String,

    /// Number of chunks to retrieve.
    #[arg(long, default_value = "3")]
    k: usize,

    /// Re-rank with maximal marginal relevance.
    #[arg(long, default_value_t = false)]
    mmr: bool,

    /// MMR trade-off between relevance (1.0) and diversity (0.0).
    #[arg(long, default_value = "0.5")]
    mmr_lambda: f32,
}

impl QuestionArgs {
    fn strategy(&self) -> SearchStrategy {
        if self.mmr {
            SearchStrategy::Mmr
        } else {
            SearchStrategy::Similarity
        }
    }

    fn mmr_config(&self) -> MmrConfig {
        MmrConfig {
            lambda: self.mmr_lambda.clamp(0.0, 1.0),
            ..MmrConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Build the knowledge base from a folder of PDF and Markdown files.
    Build {
        /// Folder scanned recursively for documents.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Rebuild even if a non-empty knowledge base already exists.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Also write every chunk as a text file under this directory.
        #[arg(long)]
        dump_chunks: Option<PathBuf>,
        #[command(flatten)]
        chunking: ChunkArgs,
    },
    /// Print the chunks retrieved for a question.
    Query {
        #[command(flatten)]
        question: QuestionArgs,
    },
    /// Retrieve context for a question and generate an answer from it.
    Ask {
        #[command(flatten)]
        question: QuestionArgs,
    },
    /// Print the number of records in the knowledge base.
    Count,
}

impl Cli {
    fn rag_config(&self) -> RagConfig {
        let backend = match &self.qdrant_url {
            Some(url) => IndexBackend::Qdrant {
                url: url.clone(),
                api_key: self.qdrant_api_key.clone(),
            },
            None => IndexBackend::Local {
                persist_dir: self.persist_dir.clone(),
            },
        };
        let provider = if self.offline_embedder {
            EmbeddingProviderKind::CharacterNgram
        } else {
            EmbeddingProviderKind::OpenAi
        };

        RagConfig {
            embedding: EmbeddingConfig {
                provider,
                base_url: self.base_url.clone(),
                api_key: self.api_key.clone(),
                model: self.embedding_model.clone(),
                dimensions: self.embedding_dimensions,
                batch_size: self.embedding_batch_size,
                ..EmbeddingConfig::default()
            },
            index: IndexConfig {
                backend,
                collection: self.collection.clone(),
                ..IndexConfig::default()
            },
            chat: ChatConfig {
                base_url: self.base_url.clone(),
                api_key: self.api_key.clone(),
                model: self.chat_model.clone(),
                temperature: self.temperature,
                ..ChatConfig::default()
            },
            ..RagConfig::default()
        }
    }
}

fn open_index(config: &RagConfig) -> anyhow::Result<VectorIndex<EmbeddingProvider, AnyStore>> {
    let embedder = EmbeddingProvider::from_config(&config.embedding)
        .context("failed to configure embedding provider")?;
    let store = AnyStore::from_config(&config.index, embedder.dimensions());
    Ok(VectorIndex::new(embedder, store, &config.index))
}

fn open_retriever(
    config: &RagConfig,
    mmr: MmrConfig,
) -> anyhow::Result<Retriever<EmbeddingProvider, AnyStore>> {
    let location = config.index.backend.location(&config.index.collection);
    Ok(Retriever::new(open_index(config)?.with_mmr(mmr), location))
}

fn print_retrieval(retrieval: &Retrieval) {
    println!("question: {}", retrieval.question);
    for (rank, chunk) in retrieval.chunks.iter().enumerate() {
        let source = chunk
            .metadata
            .get("source")
            .and_then(|value| value.as_str())
            .unwrap_or("-");
        println!("[{}] score={:.4} source={source}", rank + 1, chunk.score);
        println!("{}", chunk.content);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = cli.rag_config();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        collection = %config.index.collection,
        "exam-rag boot"
    );

    match cli.command {
        Command::Build {
            data_dir,
            force,
            dump_chunks,
            chunking,
        } => {
            config.chunking = ChunkingConfig {
                strategy: chunking.strategy.into(),
                chunk_size: chunking.chunk_size,
                chunk_overlap: chunking.chunk_overlap,
                ..ChunkingConfig::default()
            };
            config.normalizer = NormalizerConfig {
                strip_spaces: !chunking.keep_spaces,
                ..NormalizerConfig::default()
            };

            let splitter = TextSplitter::from_config(&config.chunking)?;
            let mut builder = KnowledgeBaseBuilder::new(
                open_index(&config)?,
                DirectoryLoader,
                config.normalizer.clone(),
                splitter,
            );

            let options = BuildOptions {
                force,
                dump_dir: dump_chunks,
            };
            let report = builder.build(&data_dir, &options).await?;

            if report.reused_existing {
                println!(
                    "knowledge base already holds {} records; pass --force to rebuild",
                    report.records
                );
                return Ok(());
            }

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for folder={}",
                    report.skipped_files.len(),
                    data_dir.display()
                );
            }
            if report.unsupported_files > 0 {
                info!(count = report.unsupported_files, "ignored files with unsupported suffixes");
            }

            println!(
                "{} documents, {} chunks, {} records indexed at {}",
                report.documents,
                report.chunks,
                report.records,
                Utc::now().to_rfc3339()
            );
        }
        Command::Query { question } => {
            let mut retriever = open_retriever(&config, question.mmr_config())?;
            let retrieval = retriever
                .query(&question.question, question.k, question.strategy())
                .await?;
            print_retrieval(&retrieval);
        }
        Command::Ask { question } => {
            let mut retriever = open_retriever(&config, question.mmr_config())?;
            let chat = ChatClient::new(&config.chat).context("failed to configure chat client")?;

            let retrieval = retriever
                .query(&question.question, question.k, question.strategy())
                .await?;
            let answer = chat.generate_answer(&retrieval).await?;

            println!("{answer}");
        }
        Command::Count => {
            let mut retriever = open_retriever(&config, MmrConfig::default())?;
            println!("{}", retriever.count().await?);
        }
    }

    Ok(())
}
