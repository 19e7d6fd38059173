use crate::chunking::TextSplitter;
use crate::embeddings::Embedder;
use crate::error::{BuildStage, IngestError, KnowledgeBaseError};
use crate::index::VectorIndex;
use crate::loader::{DocumentSource, SkippedFile};
use crate::models::{Chunk, Document, PAGE_KEY};
use crate::normalize::{normalize, NormalizerConfig};
use crate::traits::CollectionStore;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Empty,
    Building,
    Ready,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Rebuild even when a non-empty collection already exists.
    pub force: bool,
    /// Write every chunk to `<dir>/<source path under the data dir>/<section>.txt` for inspection.
    pub dump_dir: Option<PathBuf>,
}

#[derive(Default)]
pub struct BuildReport {
    /// The existing collection was reused and nothing was embedded.
    pub reused_existing: bool,
    pub documents: usize,
    pub chunks: usize,
    pub records: usize,
    pub skipped_files: Vec<SkippedFile>,
    pub unsupported_files: usize,
}

/// Drives load → normalize → split → index into a persisted collection.
pub struct KnowledgeBaseBuilder<E, S, L> {
    index: VectorIndex<E, S>,
    loader: Arc<L>,
    normalizer: NormalizerConfig,
    splitter: TextSplitter,
    state: BuildState,
}

impl<E, S, L> KnowledgeBaseBuilder<E, S, L>
where
    E: Embedder,
    S: CollectionStore,
    L: DocumentSource,
{
    pub fn new(
        index: VectorIndex<E, S>,
        loader: L,
        normalizer: NormalizerConfig,
        splitter: TextSplitter,
    ) -> Self {
        Self {
            index,
            loader: Arc::new(loader),
            normalizer,
            splitter,
            state: BuildState::Empty,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn index(&self) -> &VectorIndex<E, S> {
        &self.index
    }

    /// Record count of an already persisted collection, `None` when there is none.
    async fn existing_records(&mut self) -> Result<Option<usize>, KnowledgeBaseError> {
        let inspect = |error| KnowledgeBaseError::build_failed(BuildStage::Inspecting, error);

        if !self.index.store().exists().await.map_err(inspect)? {
            return Ok(None);
        }
        self.index.load_existing().await.map_err(inspect)?;
        Ok(Some(self.index.collection_count().await.map_err(inspect)?))
    }

    /// Builds the knowledge base from `source` unless a non-empty one already exists.
    ///
    /// The existing-collection check does not look at whether the source changed;
    /// pass `force` to rebuild.
    pub async fn build(
        &mut self,
        source: &Path,
        options: &BuildOptions,
    ) -> Result<BuildReport, KnowledgeBaseError> {
        if !options.force {
            if let Some(records) = self.existing_records().await?.filter(|count| *count > 0) {
                info!(
                    collection = self.index.store().collection_name(),
                    records, "knowledge base already built, skipping"
                );
                self.state = BuildState::Ready;
                return Ok(BuildReport {
                    reused_existing: true,
                    records,
                    ..BuildReport::default()
                });
            }
        }

        self.state = BuildState::Building;
        match self.run_build(source, options).await {
            Ok(report) => {
                self.state = BuildState::Ready;
                Ok(report)
            }
            Err(error) => {
                self.state = BuildState::Empty;
                Err(error)
            }
        }
    }

    async fn run_build(
        &mut self,
        source: &Path,
        options: &BuildOptions,
    ) -> Result<BuildReport, KnowledgeBaseError> {
        let loader = Arc::clone(&self.loader);
        let root = source.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&root))
            .await
            .map_err(|error| KnowledgeBaseError::build_failed(BuildStage::Loading, error))?
            .map_err(|error| KnowledgeBaseError::build_failed(BuildStage::Loading, error))?;

        for skipped in &loaded.skipped_files {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
        }
        if loaded.documents.is_empty() {
            return Err(KnowledgeBaseError::build_failed(
                BuildStage::Loading,
                IngestError::InvalidArgument(format!(
                    "no loadable documents under {}",
                    source.display()
                )),
            ));
        }

        let documents: Vec<Document> = loaded
            .documents
            .iter()
            .map(|document| Document {
                content: normalize(&document.content, &self.normalizer),
                metadata: document.metadata.clone(),
            })
            .collect();

        let chunks = self.splitter.split_documents(&documents);
        if chunks.is_empty() {
            return Err(KnowledgeBaseError::build_failed(
                BuildStage::Splitting,
                IngestError::InvalidArgument("documents produced no chunks".to_string()),
            ));
        }
        info!(documents = documents.len(), chunks = chunks.len(), "documents split");

        if let Some(dir) = &options.dump_dir {
            dump_chunks(dir, source, &chunks)
                .await
                .map_err(|error| KnowledgeBaseError::build_failed(BuildStage::Dumping, error))?;
        }

        let index_failed = |error| KnowledgeBaseError::build_failed(BuildStage::Indexing, error);
        self.index
            .create_from_documents(&chunks)
            .await
            .map_err(index_failed)?;
        let records = self.index.collection_count().await.map_err(index_failed)?;

        Ok(BuildReport {
            reused_existing: false,
            documents: documents.len(),
            chunks: chunks.len(),
            records,
            skipped_files: loaded.skipped_files,
            unsupported_files: loaded.unsupported_files,
        })
    }
}

/// Relative location of a chunk's source under `root`, keeping only plain path components.
fn source_key(root: &Path, chunk: &Chunk) -> PathBuf {
    let Some(source) = chunk.source().map(Path::new) else {
        return PathBuf::from("unknown");
    };

    let relative = source.strip_prefix(root).unwrap_or(source);
    let key: PathBuf = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    if key.as_os_str().is_empty() {
        PathBuf::from("unknown")
    } else {
        key
    }
}

fn chunk_dump_path(dir: &Path, root: &Path, chunk: &Chunk) -> PathBuf {
    let section = chunk.section().unwrap_or(0);
    let file_name = match chunk.metadata.get(PAGE_KEY).and_then(|page| page.as_i64()) {
        Some(page) => format!("p{page}_{section}.txt"),
        None => format!("{section}.txt"),
    };
    dir.join(source_key(root, chunk)).join(file_name)
}

/// Writes one file per chunk under a directory named after the chunk's source file,
/// extension included, so `os.md` and `os.pdf` never share a directory.
pub async fn dump_chunks(dir: &Path, root: &Path, chunks: &[Chunk]) -> Result<(), IngestError> {
    for chunk in chunks {
        let path = chunk_dump_path(dir, root, chunk);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &chunk.content).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use std::fs;
    use tempfile::tempdir;

    fn chunk(source: &str, page: Option<u32>, section: i64, content: &str) -> Chunk {
        let mut document = Document::new(content, source).with_metadata("section", section);
        if let Some(page) = page {
            document = document.with_metadata(PAGE_KEY, page);
        }
        Chunk {
            content: document.content,
            metadata: document.metadata,
        }
    }

    #[tokio::test]
    async fn dump_layout_is_per_source_and_ordinal() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks = vec![
            chunk("data/os.md", None, 1, "第一块"),
            chunk("data/os.md", None, 2, "第二块"),
            chunk("data/ds.pdf", Some(3), 1, "第三页"),
        ];

        dump_chunks(dir.path(), Path::new("data"), &chunks).await?;

        assert_eq!(fs::read_to_string(dir.path().join("os.md").join("2.txt"))?, "第二块");
        assert_eq!(fs::read_to_string(dir.path().join("ds.pdf").join("p3_1.txt"))?, "第三页");
        Ok(())
    }

    #[tokio::test]
    async fn sources_sharing_a_stem_keep_separate_dumps() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks = vec![
            chunk("data/os.md", None, 1, "MD内容"),
            chunk("data/sub/os.txt", None, 1, "TXT内容"),
            chunk("data/os.pdf", Some(1), 1, "PDF内容"),
        ];

        dump_chunks(dir.path(), Path::new("data"), &chunks).await?;

        assert_eq!(fs::read_to_string(dir.path().join("os.md").join("1.txt"))?, "MD内容");
        assert_eq!(
            fs::read_to_string(dir.path().join("sub").join("os.txt").join("1.txt"))?,
            "TXT内容"
        );
        assert_eq!(fs::read_to_string(dir.path().join("os.pdf").join("p1_1.txt"))?, "PDF内容");
        Ok(())
    }

    #[test]
    fn sources_outside_the_root_stay_inside_the_dump_dir() {
        let outside = chunk("/abs/other/os.md", None, 4, "x");
        let path = chunk_dump_path(Path::new("dump"), Path::new("data"), &outside);
        assert_eq!(path, Path::new("dump/abs/other/os.md/4.txt"));
    }
}
