//! SemIndex CLI - command-line interface for semantic code search indexing

use clap::{Parser, Subcommand};
use colored::Colorize;
use semindex_client::ClientRuntime;
use semindex_core::config::DEFAULT_CONFIG;
use semindex_core::query::{QueryOptions, QueryResult, RerankOption, RerankPreset};
use semindex_core::{Config, ErrorEnvelope, RunSummary, SemIndexError};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "semindex")]
#[command(about = "Semantic code search indexing", long_about = None)]
struct Cli {
    /// Codebase root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Collection name (defaults to the codebase root's directory name)
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Remote semindex-service URL; local in-process mode if omitted
    #[arg(long, global = true, env = "SEMINDEX_SERVICE_URL")]
    service_url: Option<String>,

    /// API key for the remote service (also reads SEMINDEX_API_KEY)
    #[arg(long, global = true, env = "SEMINDEX_API_KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write .semindex/config.toml with defaults
    Init,

    /// Run the indexing pipeline over the codebase
    Index {
        /// Force a full reindex, ignoring the checkpoint
        #[arg(long)]
        full: bool,

        /// Override the configured file-discovery glob for this run (local mode only)
        #[arg(long)]
        glob: Option<String>,
    },

    /// Run a semantic query against an indexed collection
    Query {
        /// Query text
        text: String,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict results to these file extensions (repeatable)
        #[arg(long = "file-type")]
        file_types: Vec<String>,

        /// Restrict results to paths matching this glob
        #[arg(long)]
        path_pattern: Option<String>,

        /// Only return chunks classified as documentation
        #[arg(long)]
        documentation_only: bool,

        /// Drop results below this similarity score
        #[arg(long)]
        score_threshold: Option<f32>,

        /// Rerank preset applied on top of similarity
        #[arg(long, value_parser = [
            "recent", "stable", "tech-debt", "hotspots", "code-review",
            "onboarding", "security-audit", "refactoring", "ownership", "impact-analysis",
        ])]
        rerank: Option<String>,
    },

    /// Show collection status (local mode) or service status (remote mode)
    Status,
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    let result = run(cli);

    if let Err(err) = result {
        let envelope = ErrorEnvelope::from(&err);
        if json {
            eprintln!("{}", serde_json::to_string_pretty(&envelope).unwrap());
        } else {
            eprintln!("{}: {}", "Error".red(), envelope.message);
            if !envelope.hint.is_empty() {
                eprintln!("{}: {}", "Hint".yellow(), envelope.hint);
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), SemIndexError> {
    match &cli.command {
        Commands::Init => cmd_init(&cli),
        Commands::Index { full, glob } => cmd_index(&cli, *full, glob.clone()),
        Commands::Query {
            text,
            limit,
            file_types,
            path_pattern,
            documentation_only,
            score_threshold,
            rerank,
        } => cmd_query(
            &cli,
            text,
            *limit,
            file_types.clone(),
            path_pattern.clone(),
            *documentation_only,
            *score_threshold,
            rerank.as_deref(),
        ),
        Commands::Status => cmd_status(&cli),
    }
}

fn cmd_init(cli: &Cli) -> Result<(), SemIndexError> {
    let root = resolve_root(cli.root.clone());
    let semindex_dir = root.join(".semindex");
    let config_path = semindex_dir.join("config.toml");

    if config_path.exists() {
        return Err(SemIndexError::ConfigExists(config_path));
    }

    std::fs::create_dir_all(&semindex_dir)?;
    std::fs::write(&config_path, DEFAULT_CONFIG)?;
    update_gitignore(&root)?;

    if cli.json {
        println!("{}", serde_json::json!({"config_path": config_path}));
    } else {
        println!("{} .semindex/config.toml", "Created".green());
        println!("{} .semindex/ to .gitignore", "Added".green());
    }
    Ok(())
}

fn cmd_index(cli: &Cli, full: bool, glob: Option<String>) -> Result<(), SemIndexError> {
    let root = resolve_root(cli.root.clone());
    let collection = resolve_collection(cli.collection.as_deref(), &root);

    if glob.is_some() && cli.service_url.is_some() {
        return Err(SemIndexError::InvalidQuery(
            "--glob only applies to local mode; omit --service-url to use it".to_string(),
        ));
    }

    let runtime = build_runtime_with_glob_override(cli, &root, glob)?;

    let summary = runtime.index(&collection, &root, full)?;
    print_run_summary(&summary, cli.json);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_query(
    cli: &Cli,
    text: &str,
    limit: Option<usize>,
    file_types: Vec<String>,
    path_pattern: Option<String>,
    documentation_only: bool,
    score_threshold: Option<f32>,
    rerank: Option<&str>,
) -> Result<(), SemIndexError> {
    let root = resolve_root(cli.root.clone());
    let collection = resolve_collection(cli.collection.as_deref(), &root);
    let runtime = build_runtime(cli, &root)?;

    let mut options = QueryOptions { limit: limit.unwrap_or(5), ..QueryOptions::default() };
    options.file_types = file_types;
    options.path_pattern = path_pattern;
    options.documentation_only = documentation_only;
    options.score_threshold = score_threshold;
    if let Some(preset) = rerank {
        options.rerank = RerankOption::Preset(parse_rerank_preset(preset));
    }

    let results = runtime.query(&collection, text, options)?;
    print_query_results(&results, cli.json);
    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<(), SemIndexError> {
    let root = resolve_root(cli.root.clone());
    let runtime = build_runtime(cli, &root)?;
    let collection = cli.collection.clone().or_else(|| {
        if runtime.is_remote() {
            None
        } else {
            Some(resolve_collection(None, &root))
        }
    });

    let report = runtime.status(collection.as_deref())?;
    match report {
        semindex_client::runtime::StatusReport::Collection(status) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status).unwrap());
            } else {
                println!("{}: {}", "Collection".blue(), status.name);
                println!("{}: v{}", "Schema".blue(), status.schema_version);
                println!("{}: {}", "Points".blue(), status.points_count);
                if let Some(last) = status.last_indexed_at {
                    println!("{}: {}", "Last indexed".blue(), last);
                }
            }
        }
        semindex_client::runtime::StatusReport::Service(status) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status).unwrap());
            } else {
                println!("{}: {}", "Service".green(), status.status);
                println!("{}: {}", "Collections registered".blue(), status.collections_registered);
            }
        }
    }
    Ok(())
}

fn build_runtime(cli: &Cli, root: &Path) -> Result<ClientRuntime, SemIndexError> {
    build_runtime_with_glob_override(cli, root, None)
}

fn build_runtime_with_glob_override(
    cli: &Cli,
    root: &Path,
    glob: Option<String>,
) -> Result<ClientRuntime, SemIndexError> {
    if let Some(url) = &cli.service_url {
        return Ok(ClientRuntime::new_remote(url, cli.api_key.clone()));
    }

    let config_path = root.join(".semindex").join("config.toml");
    let mut config =
        if config_path.exists() { Config::load(&config_path)? } else { Config::default() }
            .with_env_overrides();
    if let Some(glob) = glob {
        config.indexing.default_glob = glob;
    }
    let snapshot_base = root.join(".semindex");
    Ok(ClientRuntime::new_local(config, snapshot_base)?)
}

fn resolve_root(override_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path;
    }

    let mut current = std::env::current_dir().unwrap_or_default();
    loop {
        if current.join(".semindex").exists() || current.join(".git").exists() {
            return current;
        }
        if !current.pop() {
            return std::env::current_dir().unwrap_or_default();
        }
    }
}

fn resolve_collection(explicit: Option<&str>, root: &Path) -> String {
    if let Some(name) = explicit {
        return name.to_string();
    }
    root.file_name().and_then(|n| n.to_str()).unwrap_or("default").to_string()
}

fn parse_rerank_preset(name: &str) -> RerankPreset {
    match name {
        "recent" => RerankPreset::Recent,
        "stable" => RerankPreset::Stable,
        "tech-debt" => RerankPreset::TechDebt,
        "hotspots" => RerankPreset::Hotspots,
        "code-review" => RerankPreset::CodeReview,
        "onboarding" => RerankPreset::Onboarding,
        "security-audit" => RerankPreset::SecurityAudit,
        "refactoring" => RerankPreset::Refactoring,
        "ownership" => RerankPreset::Ownership,
        _ => RerankPreset::ImpactAnalysis,
    }
}

fn update_gitignore(root: &Path) -> Result<(), SemIndexError> {
    let gitignore_path = root.join(".gitignore");

    if gitignore_path.exists() {
        let content = std::fs::read_to_string(&gitignore_path)?;
        if !content.lines().any(|line| line.trim() == ".semindex" || line.trim() == ".semindex/") {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# semindex index\n.semindex/")?;
        }
    } else {
        std::fs::write(&gitignore_path, "# semindex index\n.semindex/\n")?;
    }
    Ok(())
}

fn print_run_summary(summary: &RunSummary, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(summary).unwrap());
        return;
    }

    println!(
        "{}: {} scanned, {} indexed, {} skipped",
        "Files".blue(),
        summary.files_scanned,
        summary.files_indexed,
        summary.files_skipped
    );
    println!("{}: {}", "Chunks".blue(), summary.chunks_created);
    println!("{}: {} ({} ms)", "Status".blue(), summary.status, summary.duration_ms);
    if !summary.errors.is_empty() {
        println!("{}: {} files", "Errors".red(), summary.errors.len());
        for err in &summary.errors {
            println!("  {} ({}): {}", err.path, err.kind, err.message);
        }
    }
}

fn print_query_results(results: &[QueryResult], json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(results).unwrap());
        return;
    }

    for result in results {
        println!(
            "{}: {}:{}-{} [{:.3}]",
            result.relative_path.cyan(),
            result.language,
            result.start_line,
            result.end_line,
            result.score
        );
        println!("{}", result.content);
        println!();
    }
    println!("({} results)", results.len());
}
