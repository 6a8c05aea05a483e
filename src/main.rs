use semdex::cli::{Cli, Commands, ConfigAction};
use semdex::config::{Config, ConfigValidator};
use semdex::embedding::{provider_from_config, BatchItem};
use semdex::error::{Result, SemdexError};
use semdex::retrieval::DEFAULT_BREADTH_MULTIPLIER;
use semdex::service::{Collaborators, SemanticIndex};
use semdex::store::{DecryptionContext, Entry, MemoryStore, UserId};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Search {
            query,
            corpus,
            user,
            limit,
            breadth,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            let breadth = breadth.unwrap_or(limit.saturating_mul(DEFAULT_BREADTH_MULTIPLIER));
            cmd_search(&config, &corpus, user, &query, limit, breadth, json)?;
        }
        Commands::Stats { corpus } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_stats(&config, &corpus)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "semdex=debug" } else { "semdex=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| SemdexError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_search(
    config: &Config,
    corpus: &Path,
    user: UserId,
    query: &str,
    limit: usize,
    breadth: usize,
    json: bool,
) -> Result<()> {
    let entries = read_corpus(corpus)?;

    runtime()?.block_on(async {
        let index = build_index(config, &entries).await?;
        let ctx = DecryptionContext::plaintext();
        let hits = index.search(user, &ctx, query, breadth, limit).await?;

        if json {
            let out = serde_json::to_string_pretty(&hits).map_err(|e| SemdexError::Json {
                source: e,
                context: "Failed to serialize results".to_string(),
            })?;
            println!("{}", out);
            return Ok(());
        }

        if hits.is_empty() {
            println!("No results for user {}", user);
            return Ok(());
        }

        println!("Results for user {} ({} found)", user, hits.len());
        for (rank, hit) in hits.iter().enumerate() {
            println!(
                "{:>2}. [{:.3}] #{} {} ({})",
                rank + 1,
                hit.score,
                hit.id,
                hit.created_at.format("%Y-%m-%d %H:%M"),
                hit.role
            );
            println!("    {}", hit.preview(120));
        }
        Ok(())
    })
}

fn cmd_stats(config: &Config, corpus: &Path) -> Result<()> {
    let entries = read_corpus(corpus)?;
    let users: BTreeSet<UserId> = entries.iter().map(|e| e.user_id).collect();

    runtime()?.block_on(async {
        let index = build_index(config, &entries).await?;
        let store = index.index_store();

        println!("Semdex Index Stats");
        println!("==================");
        println!("Entries: {}  Users: {}", entries.len(), users.len());

        for user in &users {
            let user_index = store.ensure_index(*user).await?;
            store.await_warmup(*user).await?;
            let graph = user_index.graph();
            println!(
                "  user {:>6}: {} entries, {} vectors, capacity {}, ~{} KB",
                user,
                graph.entry_count(),
                graph.len(),
                graph.capacity(),
                graph.estimated_bytes() / 1024
            );
        }

        println!(
            "\nEstimated memory: {} KB across {} resident indexes",
            store.total_estimated_bytes() / 1024,
            store.active_users().len()
        );
        Ok(())
    })
}

/// Load entries into in-memory stores and embed them all up front
async fn build_index(config: &Config, entries: &[Entry]) -> Result<SemanticIndex> {
    let store = Arc::new(MemoryStore::new());
    for entry in entries {
        store.insert_entry(entry.clone());
    }

    let provider = provider_from_config(&config.embedding)?;
    let index = SemanticIndex::new(config, Collaborators::in_memory(store, provider))?;

    let items: Vec<BatchItem> = entries
        .iter()
        .map(|e| BatchItem {
            user_id: e.user_id,
            entry_id: e.id,
            text: e.content.clone(),
        })
        .collect();
    let report = index.append_many(&items).await?;
    for failed in &report.failed {
        tracing::warn!(
            user_id = failed.user_id,
            entry_id = failed.entry_id,
            "Entry not indexed: {}",
            failed.reason
        );
    }

    Ok(index)
}

fn read_corpus(path: &Path) -> Result<Vec<Entry>> {
    let content = std::fs::read_to_string(path).map_err(|e| SemdexError::Io {
        source: e,
        context: format!("Failed to read corpus: {:?}", path),
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(no, line)| {
            serde_json::from_str(line).map_err(|e| SemdexError::Json {
                source: e,
                context: format!("Invalid entry on line {}", no + 1),
            })
        })
        .collect()
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| SemdexError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let value = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    SemdexError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            let json = serde_json::to_string_pretty(&value).map_err(|e| SemdexError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let config = Config::default().with_builtin_profiles();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Path => {
            println!("{}", Config::default_path()?.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'semdex config init' to create one."
        );
        let mut config = Config::default().with_builtin_profiles();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}
