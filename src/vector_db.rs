use crate::error::{Error, Result};
use crate::utils::ensure_dir;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: PathBuf,
    pub content: String,
    pub embedding: Array1<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    embedding_model: String,
    documents: Vec<Document>,
}

/// In-memory vector store over embedded chunks, ranked by cosine similarity.
#[derive(Debug, Default)]
pub struct VectorDB {
    documents: Vec<Document>,
}

impl VectorDB {
    pub fn new() -> Self {
        VectorDB {
            documents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn add_document(&mut self, source: PathBuf, content: String, embedding: Vec<f32>) -> Result<()> {
        if let Some(first) = self.documents.first() {
            if first.embedding.len() != embedding.len() {
                return Err(Error::index_build(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    first.embedding.len(),
                    embedding.len()
                )));
            }
        }

        self.documents.push(Document {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            content,
            embedding: Array1::from(embedding),
        });
        Ok(())
    }

    /// Returns at most `top_k` documents, most similar first. Equal scores keep
    /// insertion order.
    pub fn search_similar(&self, query_embedding: &Array1<f32>, top_k: usize) -> Vec<(f32, &Document)> {
        let mut similarities: Vec<(f32, &Document)> = self
            .documents
            .iter()
            .map(|doc| {
                let similarity = cosine_similarity(&doc.embedding, query_embedding);
                let similarity = if similarity.is_nan() { f32::NEG_INFINITY } else { similarity };
                (similarity, doc)
            })
            .collect();

        similarities.sort_by(|a, b| b.0.total_cmp(&a.0));
        similarities.truncate(top_k);
        similarities
    }

    /// Writes the store to `dir/index.json`, replacing any previous copy.
    pub fn save(&self, dir: &Path, embedding_model: &str) -> Result<()> {
        ensure_dir(dir)?;
        let persisted = PersistedIndex {
            version: FORMAT_VERSION,
            embedding_model: embedding_model.to_string(),
            documents: self.documents.clone(),
        };

        let path = dir.join(INDEX_FILE);
        let tmp_path = dir.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp_path, serde_json::to_vec(&persisted)?)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Reads a store saved by [`VectorDB::save`]. Returns `None` when nothing
    /// has been persisted yet, and the recorded embedding model otherwise.
    pub fn load(dir: &Path) -> Result<Option<(VectorDB, String)>> {
        let path = dir.join(INDEX_FILE);
        if !path.is_file() {
            return Ok(None);
        }

        let persisted: PersistedIndex = serde_json::from_slice(&fs::read(&path)?)?;
        if persisted.version != FORMAT_VERSION {
            return Err(Error::index_build(format!(
                "unsupported index format version {} in {}",
                persisted.version,
                path.display()
            )));
        }

        let db = VectorDB {
            documents: persisted.documents,
        };
        Ok(Some((db, persisted.embedding_model)))
    }
}

fn cosine_similarity(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product = a.dot(b);
    let norm_a = (a.dot(a)).sqrt();
    let norm_b = (b.dot(b)).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
