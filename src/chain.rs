use crate::embeddings::Embedder;
use crate::error::Result;
use crate::llm::{ChatModel, construct_condense_prompt, construct_prompt};
use crate::retriever::{IndexOptions, Retriever};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[async_trait]
pub trait ChatChain: Send + Sync {
    async fn ask(&self, question: &str, history: &[(String, String)]) -> Result<String>;
}

pub struct ConversationalRetrievalChain {
    options: IndexOptions,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    top_k: usize,
    retriever: OnceCell<Retriever>,
}

impl ConversationalRetrievalChain {
    pub fn new(
        options: IndexOptions,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            options,
            embedder,
            llm,
            top_k,
            retriever: OnceCell::new(),
        }
    }

    /// The index is built on first use and kept for the rest of the session.
    /// A failed build is retried on the next question.
    async fn retriever(&self) -> Result<&Retriever> {
        self.retriever
            .get_or_try_init(|| Retriever::load_or_build(&self.options, self.embedder.clone()))
            .await
    }

    async fn standalone_question(&self, question: &str, history: &[(String, String)]) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let condensed = self
            .llm
            .complete(&construct_condense_prompt(question, history))
            .await?;
        if condensed.trim().is_empty() {
            Ok(question.to_string())
        } else {
            tracing::debug!(%condensed, "condensed follow-up question");
            Ok(condensed)
        }
    }
}

#[async_trait]
impl ChatChain for ConversationalRetrievalChain {
    async fn ask(&self, question: &str, history: &[(String, String)]) -> Result<String> {
        let retriever = self.retriever().await?;
        let question = self.standalone_question(question, history).await?;

        let context = retriever.retrieve(&question, self.top_k).await?;
        for chunk in &context {
            tracing::debug!(source = %chunk.source.display(), score = chunk.score, "retrieved chunk");
        }

        self.llm.complete(&construct_prompt(&question, &context)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::LocalEmbeddings;
    use crate::error::Error;
    use crate::llm::PromptMessage;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct ScriptedModel {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<Vec<PromptMessage>>>,
    }

    impl ScriptedModel {
        fn with_replies(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<Vec<PromptMessage>> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Error::generation("quota exceeded"))
        }
    }

    fn chain_for(docs_dir: &std::path::Path, llm: Arc<ScriptedModel>) -> ConversationalRetrievalChain {
        let options = IndexOptions {
            docs_dir: docs_dir.to_path_buf(),
            chunk_size: 1000,
            persist_dir: None,
        };
        ConversationalRetrievalChain::new(options, Arc::new(LocalEmbeddings::default()), llm, 1)
    }

    #[tokio::test]
    async fn test_ask_answers_from_top_chunk() -> Result<()> {
        let docs = tempdir()?;
        fs::write(docs.path().join("jobs.txt"), "Companies I work for: Acme Corp and Globex.")?;
        fs::write(docs.path().join("food.txt"), "Pizza is my favourite dinner.")?;

        let llm = Arc::new(ScriptedModel::with_replies(&["Acme Corp and Globex."]));
        let chain = chain_for(docs.path(), llm.clone());

        let answer = chain.ask("Which companies did I work for?", &[]).await?;
        assert_eq!(answer, "Acme Corp and Globex.");

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0][0].content.contains("Acme Corp"));
        assert!(!prompts[0][0].content.contains("Pizza"));
        assert_eq!(prompts[0][1].content, "Which companies did I work for?");
        Ok(())
    }

    #[tokio::test]
    async fn test_history_condenses_question_first() -> Result<()> {
        let docs = tempdir()?;
        fs::write(docs.path().join("jobs.txt"), "Companies I work for: Acme Corp and Globex.")?;

        let llm = Arc::new(ScriptedModel::with_replies(&[
            "Which companies did I work for before Acme?",
            "Globex.",
        ]));
        let chain = chain_for(docs.path(), llm.clone());
        let history = vec![("Where do I work?".to_string(), "Acme Corp.".to_string())];

        assert_eq!(chain.ask("And before that?", &history).await?, "Globex.");

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0][0].content.contains("Follow Up Input: And before that?"));
        assert_eq!(prompts[1][1].content, "Which companies did I work for before Acme?");
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_folder_never_reaches_the_model() -> Result<()> {
        let docs = tempdir()?;
        let llm = Arc::new(ScriptedModel::with_replies(&["unused"]));
        let chain = chain_for(docs.path(), llm.clone());

        let result = chain.ask("What is my schedule tomorrow?", &[]).await;
        assert!(matches!(result, Err(Error::IndexBuild(_))));
        assert!(llm.prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_model_failure_is_propagated() -> Result<()> {
        let docs = tempdir()?;
        fs::write(docs.path().join("jobs.txt"), "I worked for Acme Corp.")?;
        let llm = Arc::new(ScriptedModel::default());
        let chain = chain_for(docs.path(), llm);

        let result = chain.ask("Where did I work?", &[]).await;
        assert!(matches!(result, Err(Error::Generation(_))));
        Ok(())
    }
}
