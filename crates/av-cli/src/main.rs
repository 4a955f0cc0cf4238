//! Ad-Vantage CLI
//!
//! CLI tool for compiling rule sources, driving the rule synchronizer against
//! files, and running the page engine over captured payloads and DOM fixtures.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use av_core::catalog::Signature;
use av_core::url::extract_host;
use av_core::{Document, EngineError, FilterEngine, InterceptMode, NodeSpec, SweepReport, SweepScheduler, CATALOG_VERSION};
use av_rules::{
    compile_rules, ControlMessage, Controller, FileSource, FileStateStore, RuleSynchronizer, OWNED_RULE_ID_BASE,
};

mod files;

use files::{load_config, read_json, read_text, write_output, CliConfig, RulesFile};

#[derive(Parser)]
#[command(name = "av-cli")]
#[command(about = "Ad-Vantage rule compiler and engine tools")]
struct Cli {
    /// Engine and sync configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Files standing in for the browser's rule engine and storage.
#[derive(clap::Args)]
struct HostFiles {
    /// Rule source (JSON array)
    #[arg(short, long)]
    source: PathBuf,

    /// Installed rules (created if missing)
    #[arg(short, long, default_value = "installed-rules.json")]
    rules: PathBuf,

    /// Persisted enabled flag (created on first write)
    #[arg(long, default_value = "state.json")]
    state: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule source into numbered declarative rules
    CompileRules {
        /// Rule source file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Bring installed rules in line with the stored (or given) enabled flag
    Sync {
        #[command(flatten)]
        files: HostFiles,

        /// Persist this flag before synchronizing
        #[arg(long)]
        enabled: Option<bool>,
    },

    /// Handle one control message
    Control {
        /// Message JSON, e.g. '{"type": "set-enabled", "enabled": false}'
        message: String,

        #[command(flatten)]
        files: HostFiles,
    },

    /// Strip ad metadata from a captured JSON response
    Scrub {
        /// Response body file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = "application/json")]
        content_type: String,
    },

    /// Run the sweep scheduler over a DOM fixture
    Sweep {
        /// DOM fixture (node spec JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Page the fixture was captured from
        #[arg(short, long, default_value = "https://www.youtube.com/")]
        page_url: String,

        /// Simulated time to run timed sweeps for (ms)
        #[arg(long, default_value_t = 30_000)]
        duration: u64,

        /// Write the surviving tree here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show how a request URL would be intercepted
    CheckUrl {
        url: String,

        /// Page the request is made from
        #[arg(short, long)]
        page_url: Option<String>,
    },

    /// Print the companion stylesheet
    Stylesheet {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Dump catalog info
    Catalog,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::CompileRules { input, output } => cmd_compile_rules(&config, &input, output.as_deref()),
        Commands::Sync { files, enabled } => cmd_sync(&config, &files, enabled),
        Commands::Control { message, files } => cmd_control(&config, &files, &message),
        Commands::Scrub {
            input,
            output,
            content_type,
        } => cmd_scrub(&config, &input, output.as_deref(), &content_type),
        Commands::Sweep {
            input,
            page_url,
            duration,
            output,
        } => cmd_sweep(&config, &input, &page_url, duration, output.as_deref()),
        Commands::CheckUrl { url, page_url } => cmd_check_url(&config, &url, page_url.as_deref()),
        Commands::Stylesheet { output } => cmd_stylesheet(&config, output.as_deref()),
        Commands::Catalog => cmd_catalog(&config, cli.verbose),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn,av_cli=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn engine(config: &CliConfig) -> Result<FilterEngine, String> {
    FilterEngine::new(config.engine.clone()).map_err(|e| e.to_string())
}

fn controller(
    config: &CliConfig,
    files: &HostFiles,
) -> Controller<FileSource, RulesFile, FileStateStore> {
    let capacity = OWNED_RULE_ID_BASE as usize + config.sync.max_rules;
    let synchronizer = RuleSynchronizer::new(
        FileSource::new(&files.source),
        RulesFile::new(&files.rules, capacity),
        config.sync.clone(),
    );
    Controller::new(synchronizer, FileStateStore::new(&files.state))
}

fn cmd_compile_rules(config: &CliConfig, input: &Path, output: Option<&Path>) -> Result<(), String> {
    let start = Instant::now();
    let text = read_text(input)?;
    let (rules, stats) = compile_rules(&text, &config.sync).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&rules).map_err(|e| e.to_string())?;
    write_output(output, &json)?;

    info!(
        "compiled '{}': {} records parsed, {} skipped",
        input.display(),
        stats.parsed,
        stats.skipped
    );
    info!("{} rules (dedupe removed {}, budget dropped {})", stats.compiled, stats.deduped, stats.truncated);
    if let (Some(first), Some(last)) = (rules.first(), rules.last()) {
        debug!("rule ids {}..={}", first.id, last.id);
    }
    debug!("compiled in {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}

fn cmd_sync(config: &CliConfig, files: &HostFiles, enabled: Option<bool>) -> Result<(), String> {
    debug!("syncing '{}' into '{}'", files.source.display(), files.rules.display());
    let mut controller = controller(config, files);
    let count = match enabled {
        Some(enabled) => {
            let response = controller.handle(&ControlMessage::SetEnabled { enabled });
            if !response.ok {
                return Err(response.error.unwrap_or_else(|| "synchronization failed".to_string()));
            }
            response.rules.unwrap_or(0)
        }
        None => controller.activate().map_err(|e| e.to_string())?,
    };
    println!("Installed {} owned rule(s) into '{}'", count, files.rules.display());
    Ok(())
}

fn cmd_control(config: &CliConfig, files: &HostFiles, message: &str) -> Result<(), String> {
    debug!("control message: {message}");
    let mut controller = controller(config, files);
    let response = controller.handle_json(message);
    let json = serde_json::to_string(&response).map_err(|e| e.to_string())?;
    println!("{json}");
    match response.error {
        Some(error) if !response.ok => Err(error),
        _ => Ok(()),
    }
}

fn cmd_scrub(config: &CliConfig, input: &Path, output: Option<&Path>, content_type: &str) -> Result<(), String> {
    let engine = engine(config)?;
    let body = read_text(input)?;

    let text = match engine.rewrite_body(content_type, body.as_bytes()) {
        Ok(Some(cleaned)) => {
            info!("removed ad metadata ({} -> {} bytes)", body.len(), cleaned.len());
            String::from_utf8(cleaned).map_err(|e| e.to_string())?
        }
        Ok(None) => {
            info!("no ad metadata found");
            body
        }
        Err(EngineError::IntegrityViolation(reasons)) => {
            warn!("cleaned payload rejected; releasing original");
            for reason in &reasons {
                warn!("  - {reason}");
            }
            body
        }
        Err(e) => return Err(e.to_string()),
    };
    write_output(output, &text)
}

fn cmd_sweep(config: &CliConfig, input: &Path, page_url: &str, duration: u64, output: Option<&Path>) -> Result<(), String> {
    let engine = engine(config)?;
    let spec: NodeSpec = read_json(input)?;
    let mut doc = Document::from_spec(&spec);
    let nodes_before = doc.len();
    debug!("loaded {} nodes from '{}'", nodes_before, input.display());

    let mut scheduler = SweepScheduler::new(&engine, page_url);
    let mut report = SweepReport::default();
    report.merge(&scheduler.start(&mut doc, 0));
    while let Some(deadline) = scheduler.next_deadline().filter(|&t| t <= duration) {
        report.merge(&scheduler.poll(&mut doc, deadline));
    }

    println!("Swept '{}' as {}", input.display(), page_url);
    println!("  Sweeps:     {}", report.sweeps);
    println!("  Visited:    {}", report.visited);
    println!("  Removed:    {} ({} -> {} nodes)", report.removed, nodes_before, doc.len());
    println!("  Hidden:     {}", report.hidden);
    println!("  Ambiguous:  {}", report.ambiguous);

    if let Some(path) = output {
        let root = doc.root();
        let tree = doc.to_spec(root).unwrap_or_default();
        let json = serde_json::to_string_pretty(&tree).map_err(|e| e.to_string())?;
        write_output(Some(path), &json)?;
    }
    Ok(())
}

fn cmd_check_url(config: &CliConfig, url: &str, page_url: Option<&str>) -> Result<(), String> {
    let engine = engine(config)?;

    if let Some(page_url) = page_url {
        let host = extract_host(page_url).unwrap_or(page_url);
        debug!("page host '{host}'");
        if engine.host_is_safelisted(host) {
            println!("{url}: pass (page host '{host}' is safelisted)");
            return Ok(());
        }
    }

    match engine.intercept_mode(url) {
        Some(InterceptMode::HardBlock) => {
            let stub = engine.hard_block_response(url);
            let kind = stub.header("content-type").unwrap_or("no body");
            println!("{url}: hard-block (stub {} {})", stub.status, kind);
        }
        Some(InterceptMode::JsonRewrite) => println!("{url}: json-rewrite"),
        None => println!("{url}: pass"),
    }
    Ok(())
}

fn cmd_stylesheet(config: &CliConfig, output: Option<&Path>) -> Result<(), String> {
    let engine = engine(config)?;
    write_output(output, engine.catalog().companion_stylesheet().trim_end())
}

fn cmd_catalog(config: &CliConfig, verbose: bool) -> Result<(), String> {
    let engine = engine(config)?;
    let catalog = engine.catalog();
    let signatures = catalog.signatures();

    println!("Signature catalog");
    println!("  Version:     {}", CATALOG_VERSION);
    println!("  Signatures:  {}", signatures.len());
    for kind in ["host-token", "attribute-key", "class-pattern", "geometry-bucket", "text-pattern", "json-key"] {
        let count = signatures.iter().filter(|s| s.kind() == kind).count();
        println!("    {kind:<16} {count}");
    }
    println!();
    println!("Interception:");
    println!("  Hard block:   {} patterns", catalog.hard_block_parts().len());
    println!("  JSON rewrite: {} patterns", catalog.json_rewrite_parts().len());
    println!("  Globals:      {}", catalog.guarded_globals().join(", "));

    if verbose {
        println!();
        for signature in &signatures {
            println!("  {:<16} {}", signature.kind(), describe(signature));
        }
    }
    Ok(())
}

fn describe(signature: &Signature<'_>) -> String {
    match signature {
        Signature::HostToken(s) | Signature::AttributeKey(s) => s.to_string(),
        Signature::ClassPattern(re) | Signature::TextPattern(re) => re.as_str().to_string(),
        Signature::GeometryBucket(b) => format!("{}x{} (±{:.0}%)", b.width, b.height, b.tolerance * 100.0),
        Signature::JsonKey { key, protected: true } => format!("{key} (protected)"),
        Signature::JsonKey { key, protected: false } => key.to_string(),
    }
}
