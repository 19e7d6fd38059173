use crate::error::IngestError;
use crate::models::{Document, PAGE_KEY};
use lopdf::Document as PdfDocument;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Loader picked from a file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    Pdf,
    Text,
}

impl LoaderKind {
    pub fn for_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(LoaderKind::Pdf),
            "md" | "markdown" | "txt" => Some(LoaderKind::Text),
            _ => None,
        }
    }

    pub fn load(self, path: &Path) -> Result<Vec<Document>, IngestError> {
        match self {
            LoaderKind::Pdf => load_pdf(path),
            LoaderKind::Text => load_text(path),
        }
    }
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedFile>,
    pub unsupported_files: usize,
}

/// Produces documents for a build from some root location. Loading is blocking work and
/// runs off the async runtime.
pub trait DocumentSource: Send + Sync + 'static {
    fn load(&self, root: &Path) -> Result<LoadReport, IngestError>;
}

/// Walks a directory recursively and loads every file with a known extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryLoader;

impl DocumentSource for DirectoryLoader {
    fn load(&self, root: &Path) -> Result<LoadReport, IngestError> {
        if !root.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "data directory does not exist: {}",
                root.display()
            )));
        }

        let mut report = LoadReport::default();

        for path in discover_files(root) {
            let Some(kind) = LoaderKind::for_path(&path) else {
                report.unsupported_files += 1;
                continue;
            };

            match kind.load(&path) {
                Ok(documents) => report.documents.extend(documents),
                Err(error) => report.skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                }),
            }
        }

        Ok(report)
    }
}

pub fn discover_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

fn source_of(path: &Path) -> Result<String, IngestError> {
    if path.file_name().is_none() {
        return Err(IngestError::MissingFileName(path.display().to_string()));
    }
    Ok(path.to_string_lossy().to_string())
}

fn load_text(path: &Path) -> Result<Vec<Document>, IngestError> {
    let content = fs::read_to_string(path)?;
    Ok(vec![Document::new(content, source_of(path)?)])
}

/// One document per page with extractable text.
fn load_pdf(path: &Path) -> Result<Vec<Document>, IngestError> {
    let source = source_of(path)?;
    let pdf = PdfDocument::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut documents = Vec::new();
    for (page_no, _page_id) in pdf.get_pages() {
        let text = pdf
            .extract_text(&[page_no])
            .map_err(|error| IngestError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            documents.push(Document::new(text, source.clone()).with_metadata(PAGE_KEY, page_no));
        }
    }

    if documents.is_empty() {
        return Err(IngestError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }

    Ok(documents)
}
