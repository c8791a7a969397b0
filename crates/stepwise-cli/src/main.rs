//! CLI entry point for the StepWise retrieval core (build the index, run queries).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stepwise_core::{
    app_data_dir, chunk_file, config_path, index_source, load_config, load_config_from, status, Chunk, Config,
    Retriever,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepwise")]
#[command(about = "StepWise: syllabus retrieval for the CBSE tutoring bot")]
struct Cli {
    /// Config file to use instead of `<data dir>/config.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Directory holding the index and metadata files.
    #[arg(long, global = true, value_name = "DIR")]
    artifacts: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status (for dev).
    Status,
    /// Show where StepWise stores its config and index (app data directory).
    DataDir,
    /// Print the effective config as TOML.
    Config {
        /// Print the config file path instead.
        #[arg(long)]
        path: bool,
    },
    /// Chunk a textbook source file and preview the result.
    Chunk {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,
        /// How many chunks to print.
        #[arg(long, default_value_t = 1)]
        show: usize,
    },
    /// Chunk, embed and index a textbook source file.
    Build {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,
    },
    /// Retrieve the passages most relevant to a question.
    Query {
        #[arg(value_name = "QUESTION")]
        question: String,
        /// Number of passages (default from config).
        #[arg(long)]
        top_k: Option<usize>,
        /// Emit JSON `{ subject, chapter, topic, text }` records.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = effective_config(&cli)?;

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("StepWise backend");
            println!("  core: {}", status());
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::Config { path } => {
            if path {
                match cli.config.or_else(config_path) {
                    Some(p) => println!("{}", p.display()),
                    None => eprintln!("Could not determine app data directory."),
                }
            } else {
                print!("{}", toml::to_string_pretty(&config).context("serializing config")?);
            }
        }
        Commands::Chunk { source, show } => {
            let chunks = chunk_file(&source, &config.chunker_options())?;
            println!("{} chunk(s) from {}", chunks.len(), source.display());
            for c in chunks.iter().take(show) {
                print_chunk(c);
            }
        }
        Commands::Build { source } => {
            let paths = config.artifact_paths()?;
            let client = config.ollama_client()?;
            let artifacts = index_source(
                &source,
                &config.chunker_options(),
                &client,
                config.embedding.batch_size,
            )
            .await
            .with_context(|| format!("indexing {}", source.display()))?;
            artifacts.save(&paths)?;
            println!("Indexed {} chunk(s)", artifacts.len());
            println!("  index:    {}", paths.index.display());
            println!("  metadata: {}", paths.metadata.display());
        }
        Commands::Query {
            question,
            top_k,
            json,
        } => {
            let paths = config.artifact_paths()?;
            let retriever = Retriever::open(&paths, config.ollama_client()?, config.retriever_options())
                .context("loading index artifacts (run `stepwise build` first)")?;
            let top_k = top_k.unwrap_or(config.retrieval.top_k);
            info!(top_k, "retrieving");
            let results = retriever.retrieve(&question, top_k).await?;
            if json {
                let passages: Vec<_> = results.iter().map(Chunk::passage).collect();
                println!("{}", serde_json::to_string_pretty(&passages)?);
            } else {
                println!("QUESTION: {question}\n");
                for (i, c) in results.iter().enumerate() {
                    println!("--- RESULT {} ---", i + 1);
                    print_chunk(c);
                }
            }
        }
    }
    Ok(())
}

fn effective_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(p) => load_config_from(p)?,
        None => load_config(),
    };
    if let Some(dir) = &cli.artifacts {
        config.artifacts.dir = Some(dir.to_string_lossy().into_owned());
    }
    Ok(config)
}

fn print_chunk(c: &Chunk) {
    println!("[{} / {} / {}] ({} words)", c.subject, c.chapter, c.topic, c.word_count());
    println!("{}\n", preview(&c.text, 500));
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_char_safe() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 2), "éé...");
    }

    #[test]
    fn artifacts_flag_overrides_config() {
        let cli = Cli::parse_from(["stepwise", "--artifacts", "/tmp/vs", "status"]);
        let config = effective_config(&cli).unwrap();
        assert_eq!(config.artifacts.dir.as_deref(), Some("/tmp/vs"));
    }

    #[test]
    fn query_flags_parse() {
        let cli = Cli::parse_from(["stepwise", "query", "define euclid's algorithm", "--top-k", "2", "--json"]);
        match cli.command {
            Some(Commands::Query { question, top_k, json }) => {
                assert_eq!(question, "define euclid's algorithm");
                assert_eq!(top_k, Some(2));
                assert!(json);
            }
            _ => panic!("expected query"),
        }
    }
}
