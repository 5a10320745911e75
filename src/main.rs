//! Groundline CLI
//!
//! Commands:
//!   init - Write a default config to ~/.groundline/config.toml
//!   ingest - Load pre-computed chunks (JSON lines) for a tenant
//!   crawl - Store a crawled page for a tenant
//!   retrieve - Rank a tenant's chunks for a query
//!   resolve - Show how a conversation's history fits the budget
//!   turn - Assemble the full context for a new message
//!   record - Append a finished exchange to a conversation
//!   stats - Show storage usage

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use groundline::config::data_dir;
use groundline::{
    logging, BudgetedContext, Config, ContentChunk, ContextEngine, ContextSection, CrawledPage,
    EngineParts, FullTextIndex, GeminiProvider, LLMProvider, Message, ProviderKind, RetrievalQuery,
    SearchBackend, SqliteStore,
};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "groundline")]
#[command(about = "Context assembly engine for conversational assistants")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to ~/.groundline/data)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Ingest chunks from a JSON-lines file (one ContentChunk per line)
    Ingest {
        #[arg(short, long)]
        tenant: String,

        path: PathBuf,
    },

    /// Store a crawled page
    Crawl {
        #[arg(short, long)]
        tenant: String,

        /// Page URL
        #[arg(short, long)]
        url: String,

        #[arg(long)]
        title: Option<String>,

        /// File holding the page text
        path: PathBuf,
    },

    /// Rank a tenant's chunks for a query
    Retrieve {
        #[arg(short, long)]
        tenant: String,

        query: String,

        /// Maximum number of chunks (defaults to config)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Resolve a conversation's history against the budget
    Resolve {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        conversation: String,
    },

    /// Assemble the context for a new message
    Turn {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        conversation: String,

        /// Persona text
        #[arg(short, long)]
        persona: Option<String>,

        query: String,
    },

    /// Append a finished exchange to a conversation
    Record {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        conversation: String,

        #[arg(long)]
        user: String,

        #[arg(long)]
        reply: String,

        /// Tokens charged for the exchange
        #[arg(long, default_value = "0")]
        tokens: usize,
    },

    /// Show storage usage
    Stats,
}

/// Open handles shared by every command.
struct Workspace {
    config: Config,
    store: Arc<SqliteStore>,
    fulltext: Option<Arc<FullTextIndex>>,
}

impl Workspace {
    fn open(config: Config, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let store = SqliteStore::open(&data_dir.join("groundline.db"))?
            .with_window_words(config.retrieval.crawl_window_words);

        let fulltext = if config.retrieval.full_text {
            Some(Arc::new(FullTextIndex::open(data_dir)?))
        } else {
            None
        };

        Ok(Self {
            config,
            store: Arc::new(store),
            fulltext,
        })
    }

    fn provider(&self) -> Option<Arc<dyn LLMProvider>> {
        match self.config.provider.kind {
            ProviderKind::Disabled => None,
            ProviderKind::Gemini => match GeminiProvider::from_config(&self.config.provider) {
                Ok(provider) => Some(Arc::new(provider)),
                Err(e) => {
                    tracing::warn!(error = %e, "provider unavailable, using token estimates");
                    None
                }
            },
        }
    }

    fn engine(&self) -> ContextEngine {
        let search: Vec<Arc<dyn SearchBackend>> = self
            .fulltext
            .iter()
            .map(|index| index.clone() as Arc<dyn SearchBackend>)
            .collect();

        ContextEngine::new(
            &self.config,
            EngineParts {
                chunks: self.store.clone(),
                history: self.store.clone(),
                summaries: self.store.clone(),
                provider: self.provider(),
                search,
            },
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default()?;
    logging::init(&config.log_level)?;

    // Init must work before any data directory exists
    let dir = cli.data_dir;
    let open = move || -> Result<Workspace> {
        let dir = match dir {
            Some(dir) => dir,
            None => data_dir()?,
        };
        Workspace::open(config, &dir)
    };

    match cli.command {
        Commands::Init { force } => run_init(force)?,

        Commands::Ingest { tenant, path } => {
            let workspace = open()?;
            let chunks = read_chunks(&path)?;
            workspace.store.insert_chunks(&tenant, &chunks)?;
            if let Some(ref index) = workspace.fulltext {
                index.index_chunks(&tenant, &chunks)?;
            }
            println!("{} Ingested {} chunks for {}", "✓".green(), chunks.len(), tenant.bold());
        }

        Commands::Crawl {
            tenant,
            url,
            title,
            path,
        } => {
            let workspace = open()?;
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            let mut page = CrawledPage {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: tenant.clone(),
                url,
                title,
                content,
                crawled_at: Utc::now(),
            };
            // A re-crawled URL keeps its stored id
            page.id = workspace.store.insert_page(&page)?;

            let segments = groundline::retrieval::segment::segment_page(
                &page,
                workspace.config.retrieval.crawl_window_words,
            );
            if let Some(ref index) = workspace.fulltext {
                index.replace_source(&tenant, &page.url, &segments)?;
            }
            println!(
                "{} Stored {} ({} segments)",
                "✓".green(),
                page.url.cyan(),
                segments.len()
            );
        }

        Commands::Retrieve { tenant, query, limit } => {
            let workspace = open()?;
            let engine = workspace.engine();
            let limit = limit.unwrap_or(workspace.config.retrieval.default_limit);
            let chunks = engine
                .index()
                .retrieve(&RetrievalQuery::new(&tenant, &query, limit), &engine.turn_deadline())
                .await;

            if chunks.is_empty() {
                println!("{}", "No chunks found.".yellow());
            }
            for (i, chunk) in chunks.iter().enumerate() {
                print_chunk(i + 1, chunk);
            }
        }

        Commands::Resolve {
            tenant,
            conversation,
        } => {
            let workspace = open()?;
            let engine = workspace.engine();
            let resolution = engine
                .budget()
                .resolve(&tenant, &conversation, &engine.turn_deadline())
                .await?;

            println!("{}", "History".bold());
            println!("  Recent messages: {}", resolution.recent.len());
            println!("  Tokens before:   {}", resolution.tokens_before);
            println!("  Tokens after:    {}", resolution.tokens_after);
            println!("  Summarized:      {}", resolution.was_summarized);
            println!("  Refreshes:       {}", resolution.refresh_count);
            if let Some(summary) = resolution.summary {
                println!("\n{}\n  {}", "Summary".bold(), summary);
            }
        }

        Commands::Turn {
            tenant,
            conversation,
            persona,
            query,
        } => {
            let workspace = open()?;
            let engine = workspace.engine();
            let context = engine
                .prepare_turn(&tenant, &conversation, &query, persona.as_deref())
                .await?;
            print_context(&context);
        }

        Commands::Record {
            tenant,
            conversation,
            user,
            reply,
            tokens,
        } => {
            let workspace = open()?;
            let engine = workspace.engine();
            let message = Message::new(tenant, conversation, user, reply).with_token_cost(tokens);
            engine.record_turn(&message).await?;
            println!("{} Recorded {}", "✓".green(), message.id.dimmed());
        }

        Commands::Stats => {
            let workspace = open()?;
            let stats = workspace.store.stats()?;
            println!("{}", "Storage".bold());
            println!("  Chunks:        {}", stats.chunk_count);
            println!("  Crawled pages: {}", stats.page_count);
            println!("  Messages:      {}", stats.message_count);
            println!("  Summaries:     {}", stats.summary_count);
            println!("  Database:      {}", format_bytes(stats.db_size_bytes));
            if let Some(ref index) = workspace.fulltext {
                println!("  Indexed docs:  {}", index.num_docs());
            }
        }
    }

    Ok(())
}

fn run_init(force: bool) -> Result<()> {
    let path = Config::path()?;
    if Config::exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            path.display().to_string().cyan()
        );
        return Ok(());
    }

    Config::default().save()?;
    println!("{} Wrote {}", "✓".green(), path.display().to_string().cyan());
    Ok(())
}

fn read_chunks(path: &Path) -> Result<Vec<ContentChunk>> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;

    let mut chunks = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: ContentChunk = serde_json::from_str(&line)
            .with_context(|| format!("Invalid chunk on line {}", n + 1))?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

fn print_chunk(rank: usize, chunk: &ContentChunk) {
    let preview: String = chunk.text.chars().take(200).collect();
    println!(
        "{}. {} {}",
        rank,
        chunk.id.bold(),
        format!("({} #{})", chunk.origin.label(), chunk.ordinal).dimmed()
    );
    println!("   {}\n", preview.replace('\n', " "));
}

fn print_context(context: &BudgetedContext) {
    for section in context.sections() {
        match section {
            ContextSection::Persona(text) => println!("{}\n{}\n", "[persona]".cyan(), text),
            ContextSection::Chunk(chunk) => {
                println!("{} {}\n{}\n", "[chunk]".cyan(), chunk.id.dimmed(), chunk.text)
            }
            ContextSection::Summary(text) => println!("{}\n{}\n", "[summary]".cyan(), text),
            ContextSection::Turn(message) => println!(
                "{} {}\n{} {}\n",
                "User:".green(),
                message.user_text,
                "Assistant:".yellow(),
                message.reply_text
            ),
        }
    }

    println!(
        "{}",
        format!(
            "{} chunks · {} recent · tokens {} → {} · total {}{}",
            context.chunks.len(),
            context.recent_messages.len(),
            context.tokens_before,
            context.tokens_after,
            context.total_tokens,
            if context.was_summarized { " · summarized" } else { "" }
        )
        .dimmed()
    );
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
