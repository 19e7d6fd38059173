use crate::models::{Metadata, RetrievedChunk};
use crate::IndexError;

/// Raw hit returned by a backend before metadata is decoded.
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub id: String,
    pub text: String,
    pub metadata: String,
    pub score: f32,
    pub embedding: Option<Vec<f32>>,
}

impl StoreHit {
    pub fn into_retrieved(self) -> Result<RetrievedChunk, IndexError> {
        let metadata = if self.metadata.trim().is_empty() {
            Metadata::new()
        } else {
            serde_json::from_str(&self.metadata)?
        };

        Ok(RetrievedChunk {
            content: self.text,
            metadata,
            score: self.score,
        })
    }
}
