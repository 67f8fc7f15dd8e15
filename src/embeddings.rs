use crate::error::{Error, Result};
use crate::openai::OpenAIClient;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use serde::Deserialize;
use std::hash::{Hash, Hasher};
use unicode_normalization::UnicodeNormalization;

/// Maximum number of inputs the embeddings endpoint accepts per request.
const MAX_BATCH_SIZE: usize = 2048;

pub const LOCAL_MODEL_NAME: &str = "local-hashed-bow";
pub const LOCAL_DIMENSION: usize = 512;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the model; persisted indexes record it so a reload never
    /// mixes vectors from different models.
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::generation("embedding backend returned no vector"))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// One request's worth of embeddings; `embed_in_batches` splits the input.
#[async_trait]
trait BatchEmbedder: Send + Sync {
    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>>;
}

async fn embed_in_batches(
    backend: &dyn BatchEmbedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut embeddings = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = backend.embed_batch(batch).await?;
        if vectors.len() != batch.len() {
            return Err(Error::generation(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        embeddings.extend(vectors);
    }
    Ok(embeddings)
}

pub struct OpenAIEmbeddings {
    client: OpenAIClient,
    model: String,
}

impl OpenAIEmbeddings {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl BatchEmbedder for OpenAIEmbeddings {
    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        tracing::debug!(model = %self.model, inputs = batch.len(), "requesting embeddings");
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });
        let response: EmbeddingResponse = self.client.post("embeddings", &body).await?;
        order_embeddings(response, batch.len())
    }
}

/// Puts the returned vectors back in input order and checks none is missing.
fn order_embeddings(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(Error::generation(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    if data.iter().enumerate().any(|(i, d)| d.index != i) {
        return Err(Error::generation("embedding response has inconsistent indices"));
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAIEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_in_batches(self, texts, MAX_BATCH_SIZE).await
    }
}

pub struct LocalEmbeddings {
    dimension: usize,
}

impl LocalEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        lazy_static! {
            static ref STOP_WORDS: FxHashSet<&'static str> = {
                let words = vec![
                    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from",
                    "has", "he", "in", "is", "it", "its", "of", "on", "that", "the",
                    "to", "was", "were", "will", "with", "what", "did", "i", "my",
                ];
                words.into_iter().collect()
            };
            static ref PUNCTUATION: Regex = Regex::new(r"[^\w\s]").unwrap();
        }

        let text = text.nfc().collect::<String>().to_lowercase();
        let text = PUNCTUATION.replace_all(&text, " ");

        text.split_whitespace()
            .filter(|&token| !STOP_WORDS.contains(token))
            .map(|token| token.to_string())
            .collect()
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = FxHasher::default();
        token.hash(&mut hasher);
        (hasher.finish() % self.dimension as u64) as usize
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut term_freq: FxHashMap<String, f32> = FxHashMap::default();
        for token in Self::tokenize(text) {
            *term_freq.entry(token).or_insert(0.0) += 1.0;
        }

        let mut vector = vec![0.0; self.dimension];
        for (term, freq) in term_freq {
            // Sublinear scaling keeps repeated words from dominating.
            vector[self.bucket(&term)] += 1.0 + freq.ln();
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for LocalEmbeddings {
    fn default() -> Self {
        Self::new(LOCAL_DIMENSION)
    }
}

#[async_trait]
impl Embedder for LocalEmbeddings {
    fn model_name(&self) -> &str {
        LOCAL_MODEL_NAME
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns each numeric input as a one-element vector and records batch sizes.
    #[derive(Default)]
    struct RecordingBackend {
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BatchEmbedder for RecordingBackend {
        async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batch_sizes.lock().unwrap().push(batch.len());
            Ok(batch
                .iter()
                .map(|text| vec![text.parse::<f32>().unwrap()])
                .collect())
        }
    }

    struct ShortBackend;

    #[async_trait]
    impl BatchEmbedder for ShortBackend {
        async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![0.0]; batch.len() - 1])
        }
    }

    #[tokio::test]
    async fn test_batches_respect_request_limit_and_keep_order() -> Result<()> {
        let backend = RecordingBackend::default();
        let texts: Vec<String> = (0..MAX_BATCH_SIZE + 1).map(|i| i.to_string()).collect();

        let embeddings = embed_in_batches(&backend, &texts, MAX_BATCH_SIZE).await?;

        assert_eq!(*backend.batch_sizes.lock().unwrap(), vec![MAX_BATCH_SIZE, 1]);
        assert_eq!(embeddings.len(), texts.len());
        assert!(embeddings.iter().enumerate().all(|(i, v)| v[0] == i as f32));
        Ok(())
    }

    #[tokio::test]
    async fn test_short_batch_is_generation_error() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let result = embed_in_batches(&ShortBackend, &texts, MAX_BATCH_SIZE).await;
        assert!(matches!(result, Err(Error::Generation(_))));
    }

    #[test]
    fn test_tokenize_normalizes_and_drops_stop_words() {
        let tokens = LocalEmbeddings::tokenize("The Café, and the MEETING!");
        assert_eq!(tokens, vec!["café", "meeting"]);
    }

    #[tokio::test]
    async fn test_local_embeddings_are_deterministic_and_normalized() -> Result<()> {
        let embedder = LocalEmbeddings::default();
        let texts = vec!["Dentist appointment tomorrow".to_string()];
        let first = embedder.embed(&texts).await?;
        let second = embedder.embed(&texts).await?;
        assert_eq!(first, second);
        assert_eq!(first[0].len(), LOCAL_DIMENSION);

        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_word_only_text_embeds_to_zero() -> Result<()> {
        let embedder = LocalEmbeddings::new(16);
        let vector = embedder.embed_query("the and of").await?;
        assert!(vector.iter().all(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn test_order_embeddings_restores_input_order() -> Result<()> {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[2.0],"index":1},{"embedding":[1.0],"index":0}],"model":"m"}"#,
        )?;
        assert_eq!(order_embeddings(response, 2)?, vec![vec![1.0], vec![2.0]]);

        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[1.0],"index":0}]}"#)?;
        assert!(matches!(order_embeddings(response, 2), Err(Error::Generation(_))));
        Ok(())
    }
}
