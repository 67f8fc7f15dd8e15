use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use docusearch::chain::ConversationalRetrievalChain;
use docusearch::config::{Config, EmbeddingProvider, resolve_api_key};
use docusearch::embeddings::{Embedder, LocalEmbeddings, OpenAIEmbeddings};
use docusearch::llm::{LLM, LLMConfig};
use docusearch::openai::OpenAIClient;
use docusearch::retriever::IndexOptions;
use docusearch::session::{ChatSession, Input, Role, SUGGESTIONS};
use docusearch::typewriter::Typewriter;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const TITLE: &str = "🔥Docusearch GPT App";
const DESCRIPTION: &str = "This app combines ChatGPT's conversational abilities with document analysis. \
It processes uploaded documents, extracting insights and generating contextually relevant responses. \
The result is a powerful tool for both casual conversations and professional tasks.";
const DISCLAIMER: &str = "This app may produce inaccurate information - it derives its answers from \
statistics and thus will give the most probable answer, not necessarily a factual one.";

/// Chat with a folder of local documents.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Folder containing the documents to index
    #[arg(short, long)]
    docs: Option<PathBuf>,

    /// Save the index to disk and reuse it on later runs
    #[arg(long)]
    persist: bool,

    /// Directory for the persisted index
    #[arg(long)]
    persist_dir: Option<PathBuf>,

    /// Number of chunks retrieved per question
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Delay between revealed words, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Do not pass earlier questions and answers to the model
    #[arg(long)]
    no_history: bool,

    /// Embed documents locally instead of calling the embeddings API
    #[arg(long)]
    local_embeddings: bool,

    /// Configuration file (defaults to ./docusearch.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Secrets file holding APIKEY
    #[arg(long)]
    secrets: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(docs) = &self.docs {
            config.documents.folder = docs.clone();
        }
        if self.persist {
            config.index.persist = true;
        }
        if let Some(dir) = &self.persist_dir {
            config.index.persist_dir = dir.clone();
        }
        if let Some(top_k) = self.top_k {
            config.retrieval.top_k = top_k;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.chat.typing_delay_ms = delay_ms;
        }
        if self.no_history {
            config.chat.carry_history = false;
        }
        if self.local_embeddings {
            config.embeddings.provider = EmbeddingProvider::Local;
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_chain(config: &Config) -> docusearch::Result<ConversationalRetrievalChain> {
    let client = OpenAIClient::new(&config.openai.base_url, config.require_api_key()?);

    let embedder: Arc<dyn Embedder> = match config.embeddings.provider {
        EmbeddingProvider::OpenAI => Arc::new(OpenAIEmbeddings::new(
            client.clone(),
            config.openai.embedding_model.clone(),
        )),
        EmbeddingProvider::Local => Arc::new(LocalEmbeddings::default()),
    };

    let llm = Arc::new(LLM::new(
        client,
        LLMConfig {
            model: config.openai.chat_model.clone(),
            temperature: config.openai.temperature,
            max_tokens: config.openai.max_tokens,
        },
    ));

    let options = IndexOptions {
        docs_dir: config.documents.folder.clone(),
        chunk_size: config.documents.chunk_size,
        persist_dir: config
            .index
            .persist
            .then(|| config.index.persist_dir.clone()),
    };

    Ok(ConversationalRetrievalChain::new(
        options,
        embedder,
        llm,
        config.retrieval.top_k,
    ))
}

fn role_label(role: Role) -> colored::ColoredString {
    match role {
        Role::User => "you:".bright_cyan().bold(),
        Role::Assistant => "assistant:".bright_green().bold(),
    }
}

fn print_banner() {
    println!("{}", TITLE.bold());
    println!("{}", DESCRIPTION);
    println!("{} {}", "⚠️ Disclaimer:".yellow(), DISCLAIMER.dimmed());
    println!();
    println!("{}", "🎙️ Chat".bold());
}

fn write_suggestions<W: Write>(out: &mut W) -> io::Result<()> {
    for (i, suggestion) in SUGGESTIONS.iter().enumerate() {
        writeln!(out, "  {} {}", format!("/{}", i + 1).bright_cyan(), suggestion.label)?;
    }
    out.flush()
}

/// Runs one question through the session and shows the answer or the error,
/// then offers the suggestions again.
async fn answer_turn<W: Write>(
    session: &mut ChatSession,
    typewriter: &Typewriter,
    query: &str,
    out: &mut W,
) -> io::Result<()> {
    writeln!(out, "{} {}", role_label(Role::User), query)?;
    writeln!(out, "{}", "Hang on...".dimmed())?;
    out.flush()?;

    match session.submit(query).await {
        Ok(Some(answer)) => {
            write!(out, "{} ", role_label(Role::Assistant))?;
            typewriter.play(&answer, out).await?;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(error = ?e, "question failed");
            eprintln!("{} {}\n", "Error:".red().bold(), e);
        }
    }
    write_suggestions(out)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.api_key = resolve_api_key(args.secrets.as_deref())?;
    config.validate()?;

    let chain = build_chain(&config)?;
    let mut session = ChatSession::new(Arc::new(chain), config.chat.carry_history);
    let typewriter = Typewriter::new(Duration::from_millis(config.chat.typing_delay_ms));

    print_banner();
    println!("{}", "Ask a question in the chatbox to get started!".green());
    write_suggestions(&mut io::stdout())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "What do you want to know?".dimmed());
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break; // EOF (Ctrl+D)
        };

        let input = Input::parse(&line);
        let Some(query) = input.query() else {
            write_suggestions(&mut io::stdout())?;
            continue;
        };

        answer_turn(&mut session, &typewriter, query, &mut io::stdout()).await?;
    }

    tracing::info!(messages = session.transcript().len(), "session ended");
    println!();
    Ok(())
}
