//! `lex-rs`: command-line front end for the extraction engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use lexextract::logging::{init_progress_handler, ConsoleProgressHandler};
use lexextract::{extract, Document, ExtractorConfig};

/// Extract typed legal entities and relationships from a document.
#[derive(Parser, Debug)]
#[command(name = "lex-rs", version, about)]
struct Cli {
    /// Path to a plain-text document.
    input: PathBuf,

    /// Also extract relationships (four-wave pipeline).
    #[arg(short, long)]
    relationships: bool,

    /// Document id recorded in the result (defaults to the file name).
    #[arg(long)]
    document_id: Option<String>,

    /// Emit the full result as JSON instead of a summary.
    #[arg(long)]
    json: bool,

    /// Only print errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Print debug-level progress.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let handler = if cli.quiet {
        ConsoleProgressHandler::quiet()
    } else if cli.verbose {
        ConsoleProgressHandler::verbose()
    } else {
        ConsoleProgressHandler::new()
    };
    init_progress_handler(Arc::new(handler));

    // Config resolution: LEXEXTRACT_CONFIG / env vars, falling back to
    // ~/.config/lexextract/config.toml when present.
    if std::env::var("LEXEXTRACT_CONFIG").is_err() {
        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("lexextract").join("config.toml");
            if default_path.exists() {
                std::env::set_var("LEXEXTRACT_CONFIG", &default_path);
            }
        }
    }
    let config = ExtractorConfig::from_env().context("invalid configuration")?;

    let text = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let document_id = cli.document_id.unwrap_or_else(|| {
        cli.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    });
    let document = Document::with_id(document_id, text);

    let result = extract(&document, &config, cli.relationships).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!(
        "{} {} ({} waves, {} tokens, {:.2}s)",
        "strategy:".bold(),
        result.strategy.as_str().cyan(),
        result.waves_executed,
        result.tokens_used,
        result.processing_time
    );

    let mut by_type: HashMap<&str, usize> = HashMap::new();
    for entity in &result.entities {
        *by_type.entry(entity.entity_type.as_str()).or_insert(0) += 1;
    }
    let mut counts: Vec<(&str, usize)> = by_type.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    println!("{} {}", "entities:".bold(), result.entities.len());
    for (entity_type, count) in counts {
        println!("  {:<28} {}", entity_type.green(), count);
    }

    if cli.relationships {
        println!("{} {}", "relationships:".bold(), result.relationships.len());
        for rel in &result.relationships {
            println!(
                "  {} {} {} ({:.2})",
                rel.source_entity_id,
                rel.relationship_type.yellow(),
                rel.target_entity_id,
                rel.confidence
            );
        }
    }

    Ok(())
}
