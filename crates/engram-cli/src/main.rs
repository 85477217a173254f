use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use engram_core::time::{now_unix_millis, unix_millis_to_iso8601};
use engram_core::{
    BudgetPruner, ConfidenceClassifier, ContextPipeline, EngineConfig, EngramScorer, Entry,
    SleepCompressor,
};
use engram_store::Workspace;

#[derive(Parser)]
#[command(name = "engram", about = "Token-budgeted context optimizer for agent sessions")]
struct Cli {
    /// Data directory (default: $ENGRAM_DATA_DIR or ~/.engram)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest text (file or stdin) into the working set
    Optimize {
        /// Input file; reads stdin when omitted
        file: Option<PathBuf>,

        /// Override the configured token budget
        #[arg(long)]
        budget: Option<usize>,

        /// Metadata attached to every entry (KEY=VALUE, repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the current context in chronological order
    Context,

    /// Merge duplicates and purge decayed entries
    Consolidate,

    /// Show working-set and telemetry statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Also list the N most recent optimization runs
        #[arg(long, default_value_t = 0)]
        recent: usize,
    },

    /// Export the pipeline snapshot to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Import a pipeline snapshot from a JSON file
    Import {
        /// Input file path
        path: PathBuf,
    },
}

fn open_workspace(cli: &Cli) -> Result<Workspace> {
    let base_dir = cli.data_dir.clone().or_else(|| {
        std::env::var("ENGRAM_DATA_DIR")
            .ok()
            .map(PathBuf::from)
    });
    Workspace::open(base_dir.as_deref()).context("failed to open data directory")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Optimize {
            file,
            budget,
            meta,
            json,
        } => cmd_optimize(&cli, file.as_deref(), *budget, meta, *json),
        Commands::Context => cmd_context(&cli),
        Commands::Consolidate => cmd_consolidate(&cli),
        Commands::Stats { json, recent } => cmd_stats(&cli, *json, *recent),
        Commands::Export { path } => cmd_export(&cli, path),
        Commands::Import { path } => cmd_import(&cli, path),
    }
}

/// Warm pipeline from the stored snapshot. A rejected snapshot, or none,
/// gives a cold pipeline seeded from the stored entries.
fn load_pipeline(ws: &Workspace, config: &EngineConfig, now: u64) -> Result<ContextPipeline> {
    let mut pipeline =
        ContextPipeline::new(config).context("invalid engine configuration")?;

    let snapshot = ws.store().load_snapshot().context("failed to read snapshot")?;
    if let Some(json) = snapshot {
        match pipeline.restore_json(&json) {
            Ok(()) => return Ok(pipeline),
            Err(e) => {
                tracing::warn!("stored snapshot rejected ({e}); rebuilding from entries");
                ws.store()
                    .clear_snapshot()
                    .context("failed to clear rejected snapshot")?;
            }
        }
    }

    let entries = ws.store().list_entries().context("failed to load entries")?;
    if !entries.is_empty() {
        pipeline.ingest_entries(entries, now);
    }
    Ok(pipeline)
}

fn save_pipeline(ws: &Workspace, pipeline: &ContextPipeline) -> Result<()> {
    let json = pipeline
        .export_json()
        .context("failed to serialize snapshot")?;
    let store = ws.store();
    store
        .replace_entries(pipeline.entries())
        .context("failed to save entries")?;
    store.save_snapshot(&json).context("failed to save snapshot")?;
    Ok(())
}

fn parse_meta(pairs: &[String]) -> Result<BTreeMap<String, serde_json::Value>> {
    let mut meta = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid --meta '{pair}', expected KEY=VALUE");
        };
        meta.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }
    Ok(meta)
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn cmd_optimize(
    cli: &Cli,
    file: Option<&Path>,
    budget: Option<usize>,
    meta: &[String],
    json: bool,
) -> Result<()> {
    let ws = open_workspace(cli)?;
    let meta = parse_meta(meta)?;
    let text = read_input(file)?;

    let mut config = ws.config().clone();
    if let Some(budget) = budget {
        config.realtime.token_budget = budget;
    }

    let now = now_unix_millis();
    let mut pipeline =
        load_pipeline(&ws, &config, now)?.with_store(Box::new(ws.shared_store()));
    let result = pipeline.ingest_at(&text, &meta, now);
    save_pipeline(&ws, &pipeline)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "added {}, kept {}, evicted {}",
            result.entries_added, result.entries_kept, result.entries_evicted
        );
        println!(
            "tokens {} -> {} ({:.1}% of budget)",
            result.tokens_before,
            result.tokens_after,
            result.budget_utilization * 100.0
        );
    }
    Ok(())
}

fn cmd_context(cli: &Cli) -> Result<()> {
    let ws = open_workspace(cli)?;
    let pipeline = load_pipeline(&ws, ws.config(), now_unix_millis())?;

    let context = pipeline.context();
    if context.is_empty() {
        println!("(no context)");
    } else {
        println!("{context}");
    }
    Ok(())
}

fn cmd_consolidate(cli: &Cli) -> Result<()> {
    let ws = open_workspace(cli)?;
    let now = now_unix_millis();
    let entries = ws.store().list_entries().context("failed to load entries")?;

    let config = ws.config();
    let result = SleepCompressor::from_config(config).consolidate(&entries, now);

    // One-shot fit of the merged set to the pruning budget.
    let scorer = EngramScorer::new(config.decay.clone());
    let classifier =
        ConfidenceClassifier::new(&config.states).context("invalid state thresholds")?;
    let scored: Vec<Entry> = result
        .kept
        .iter()
        .map(|e| classifier.classify_entry(&scorer.apply(e, now)))
        .collect();
    let pruned = BudgetPruner::from_config(&config.pruning).prune(&scored, now);

    // Re-derive the optimizer state from what survived.
    let mut pipeline = ContextPipeline::new(config).context("invalid engine configuration")?;
    if !pruned.kept.is_empty() {
        pipeline.ingest_entries(pruned.kept, now);
    }
    save_pipeline(&ws, &pipeline)?;

    println!(
        "entries {} -> {} (decayed {}, duplicates {})",
        result.entries_before,
        result.entries_after,
        result.decayed_removed,
        result.duplicates_removed
    );
    println!("compression: {:.2}", result.compression_ratio);
    if !pruned.removed.is_empty() {
        println!("over budget: {} pruned", pruned.removed.len());
    }
    if cli.verbose {
        for id in &result.removed {
            eprintln!("removed {id}");
        }
    }
    Ok(())
}

fn cmd_stats(cli: &Cli, json: bool, recent: usize) -> Result<()> {
    let ws = open_workspace(cli)?;
    let pipeline = load_pipeline(&ws, ws.config(), now_unix_millis())?;
    let stats = pipeline.stats();
    let store = ws.store();
    let telemetry = store
        .optimization_stats()
        .context("failed to read optimization stats")?;
    let runs = store
        .recent_optimizations(recent)
        .context("failed to read recent optimizations")?;

    if json {
        let out = serde_json::json!({
            "pipeline": stats,
            "optimizations": telemetry,
            "recent": runs,
            "dbSize": store.db_size(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("entries:      {}", stats.current_entries);
    println!("tokens:       {}", stats.current_tokens);
    println!("budget:       {}", stats.token_budget);
    println!("utilization:  {:.1}%", stats.budget_utilization * 100.0);
    println!("window:       {}", stats.window_size);
    println!("ingested:     {}", stats.total_ingested);
    println!("evicted:      {}", stats.total_evicted);
    println!("terms:        {}", stats.optimizer.indexed_terms);
    println!("runs:         {}", telemetry.runs);
    println!("tokens_saved: {}", telemetry.tokens_saved());
    if let Some(ts) = telemetry.last_run {
        println!("last_run:     {}", unix_millis_to_iso8601(ts));
    }
    println!("db_size:      {:.1}KB", store.db_size() as f64 / 1024.0);
    for run in &runs {
        println!(
            "run {}: {} -> {} tokens, {} pruned, {:.2}ms",
            unix_millis_to_iso8601(run.timestamp),
            run.tokens_before,
            run.tokens_after,
            run.entries_pruned,
            run.duration.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

fn cmd_export(cli: &Cli, path: &Path) -> Result<()> {
    let ws = open_workspace(cli)?;
    ws.store()
        .export_snapshot_file(path)
        .context("failed to export snapshot")?;
    println!("exported to {}", path.display());
    Ok(())
}

fn cmd_import(cli: &Cli, path: &Path) -> Result<()> {
    let ws = open_workspace(cli)?;
    let snapshot = ws
        .store()
        .import_snapshot_file(path)
        .context("failed to import snapshot")?;
    println!(
        "imported from {}. entries={}, ingested={}",
        path.display(),
        snapshot.optimizer.cache.len(),
        snapshot.total_ingested
    );
    Ok(())
}
