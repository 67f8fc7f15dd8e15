use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::utils::{load_documents, split_into_chunks};
use crate::vector_db::VectorDB;
use ndarray::Array1;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub docs_dir: PathBuf,
    pub chunk_size: usize,
    /// `Some` enables persistence: reuse the saved index, or save a new one.
    pub persist_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub source: PathBuf,
    pub content: String,
    pub score: f32,
}

pub struct Retriever {
    vector_db: VectorDB,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    /// Loads, chunks and embeds every supported document under `options.docs_dir`.
    pub async fn build(options: &IndexOptions, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let documents = load_documents(&options.docs_dir)?;

        let mut sources = Vec::new();
        let mut contents = Vec::new();
        for document in &documents {
            for chunk in split_into_chunks(&document.content, options.chunk_size) {
                sources.push(document.path.clone());
                contents.push(chunk);
            }
        }

        if contents.is_empty() {
            return Err(Error::index_build(format!(
                "documents in {} contain no text",
                options.docs_dir.display()
            )));
        }

        tracing::info!(
            documents = documents.len(),
            chunks = contents.len(),
            model = embedder.model_name(),
            "building index from {}",
            options.docs_dir.display()
        );

        let embeddings = embedder.embed(&contents).await?;
        if embeddings.len() != contents.len() {
            return Err(Error::generation(format!(
                "expected {} embeddings, got {}",
                contents.len(),
                embeddings.len()
            )));
        }

        let mut vector_db = VectorDB::new();
        for ((source, content), embedding) in sources.into_iter().zip(contents).zip(embeddings) {
            vector_db.add_document(source, content, embedding)?;
        }

        Ok(Retriever { vector_db, embedder })
    }

    /// Reuses the persisted index when persistence is enabled and a compatible
    /// copy exists; otherwise builds a new one and persists it if enabled.
    pub async fn load_or_build(options: &IndexOptions, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let Some(persist_dir) = &options.persist_dir else {
            return Self::build(options, embedder).await;
        };

        match VectorDB::load(persist_dir) {
            Ok(Some((vector_db, model))) if model == embedder.model_name() && !vector_db.is_empty() => {
                tracing::info!(chunks = vector_db.len(), "reusing index from {}", persist_dir.display());
                return Ok(Retriever { vector_db, embedder });
            }
            Ok(Some((_, model))) => {
                tracing::warn!(
                    "persisted index was built with {}, rebuilding for {}",
                    model,
                    embedder.model_name()
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("cannot reuse persisted index, rebuilding: {}", e),
        }

        let retriever = Self::build(options, embedder).await?;
        retriever
            .vector_db
            .save(persist_dir, retriever.embedder.model_name())?;
        tracing::info!("index saved to {}", persist_dir.display());
        Ok(retriever)
    }

    pub fn len(&self) -> usize {
        self.vector_db.len()
    }

    /// Returns at most `top_k` chunks ranked by similarity to `query`.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Chunk>> {
        if top_k == 0 {
            return Err(Error::config("top_k must be at least 1"));
        }

        let query_embedding = Array1::from(self.embedder.embed_query(query).await?);
        Ok(self
            .vector_db
            .search_similar(&query_embedding, top_k)
            .into_iter()
            .map(|(score, doc)| Chunk {
                source: doc.source.clone(),
                content: doc.content.clone(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::LocalEmbeddings;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    /// Counts calls so tests can tell a reload from a rebuild.
    struct CountingEmbedder {
        inner: LocalEmbeddings,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::generation("connection refused"))
        }
    }

    fn sample_docs() -> std::io::Result<TempDir> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("calendar.txt"),
            "Tomorrow at 9am dentist appointment. Tomorrow afternoon team standup meeting.",
        )?;
        fs::write(
            dir.path().join("resume.md"),
            "Worked as engineer at Acme Corp. Previously worked at Globex companies.",
        )?;
        fs::write(
            dir.path().join("purchases.csv"),
            "Bought a laptop for 2400 dollars. Bought groceries for 80 dollars.",
        )?;
        Ok(dir)
    }

    fn options(dir: &TempDir, persist_dir: Option<PathBuf>) -> IndexOptions {
        IndexOptions {
            docs_dir: dir.path().to_path_buf(),
            chunk_size: 1000,
            persist_dir,
        }
    }

    #[tokio::test]
    async fn test_retrieve_returns_most_relevant_chunk() -> Result<()> {
        let docs = sample_docs()?;
        let retriever = Retriever::build(&options(&docs, None), Arc::new(LocalEmbeddings::default())).await?;
        assert_eq!(retriever.len(), 3);

        let chunks = retriever.retrieve("dentist appointment tomorrow", 1).await?;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].source.ends_with("calendar.txt"));

        for k in 1..=5 {
            assert!(retriever.retrieve("laptop", k).await?.len() <= k);
        }
        assert!(matches!(retriever.retrieve("laptop", 0).await, Err(Error::Config(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_folder_fails_without_embedding() -> Result<()> {
        let dir = tempdir()?;
        let embedder = Arc::new(CountingEmbedder {
            inner: LocalEmbeddings::default(),
            calls: AtomicUsize::new(0),
        });
        let result = Retriever::build(&options(&dir, None), embedder.clone()).await;
        assert!(matches!(result, Err(Error::IndexBuild(_))));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_embedding_failure_is_generation_error() -> Result<()> {
        let docs = sample_docs()?;
        let result = Retriever::build(&options(&docs, None), Arc::new(FailingEmbedder)).await;
        assert!(matches!(result, Err(Error::Generation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_persisted_index_is_reused_deterministically() -> Result<()> {
        let docs = sample_docs()?;
        let persist = tempdir()?;
        let opts = options(&docs, Some(persist.path().to_path_buf()));

        let first = Retriever::load_or_build(&opts, Arc::new(LocalEmbeddings::default())).await?;
        let first_top = first.retrieve("laptop purchase", 1).await?;

        let embedder = Arc::new(CountingEmbedder {
            inner: LocalEmbeddings::default(),
            calls: AtomicUsize::new(0),
        });
        let second = Retriever::load_or_build(&opts, embedder.clone()).await?;
        // Chunks came from disk, nothing embedded yet.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        let second_top = second.retrieve("laptop purchase", 1).await?;
        let third_top = second.retrieve("laptop purchase", 1).await?;

        assert_eq!(first_top, second_top);
        assert_eq!(second_top, third_top);
        assert!(second_top[0].source.ends_with("purchases.csv"));
        Ok(())
    }

    #[tokio::test]
    async fn test_model_mismatch_triggers_rebuild() -> Result<()> {
        let docs = sample_docs()?;
        let persist = tempdir()?;
        VectorDB::new().save(persist.path(), "other-model")?;

        let embedder = Arc::new(CountingEmbedder {
            inner: LocalEmbeddings::default(),
            calls: AtomicUsize::new(0),
        });
        let opts = options(&docs, Some(persist.path().to_path_buf()));
        let retriever = Retriever::load_or_build(&opts, embedder.clone()).await?;
        assert_eq!(retriever.len(), 3);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        let (_, model) = VectorDB::load(persist.path())?.expect("rebuilt index is saved");
        assert_eq!(model, embedder.model_name());
        Ok(())
    }
}
