//! coreflink - coreference clustering passes from the command line
//!
//! # Usage
//!
//! ```bash
//! # Score, cluster, and cache every document in a scored-triad file
//! coreflink run --scores dev.jsonl --key dev.key --out results/
//!
//! # Sweep the threshold over cached trees
//! coreflink cut --key dev.key --out results/ --threshold 0.3 --responses results/t0.3
//!
//! # Re-aggregate cached raw scores with a wider window
//! coreflink recluster --key dev.key --out results/ --window 3
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use is_terminal::IsTerminal;

use coreflink::cache::ResultCache;
use coreflink::cluster::{CutCriterion, DEFAULT_INCONSISTENCY_DEPTH};
use coreflink::config::MissingPolicy;
use coreflink::pipeline::PassSummary;
use coreflink::source::{DocumentIndex, JsonlSource, PrecomputedScorer};
use coreflink::{AggregationPolicy, CacheMode, Pipeline, PipelineConfig};

// ============================================================================
// CLI Structure
// ============================================================================

/// Coreference clusters from pairwise link scores
#[derive(Parser)]
#[command(name = "coreflink", version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score, aggregate, cluster, and cache (compute-and-cache)
    #[command(visible_alias = "r")]
    Run(RunArgs),

    /// Cut cached linkage trees again (cut-only)
    #[command(visible_alias = "c")]
    Cut(PassArgs),

    /// Re-aggregate cached raw scores and rebuild trees (recluster-from-raw)
    Recluster(PassArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Scored-triad records, one JSON object per line
    #[arg(long, value_name = "JSONL")]
    scores: PathBuf,

    /// Also cluster the ground-truth labels and report gold cluster counts
    #[arg(long)]
    cluster_gold: bool,

    #[command(flatten)]
    pass: PassArgs,
}

#[derive(Args)]
struct PassArgs {
    /// Bracket key file giving document ids, lengths, and words
    #[arg(long, value_name = "FILE")]
    key: PathBuf,

    /// Cache directory (raw_scores/, linkages/, responses/)
    #[arg(long, short, value_name = "DIR")]
    out: PathBuf,

    /// Write responses here instead of <out>/responses
    #[arg(long, value_name = "DIR")]
    responses: Option<PathBuf>,

    /// JSON configuration; flags override its fields
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cut threshold
    #[arg(long, short)]
    threshold: Option<f64>,

    /// Average the last N observations of each pair
    #[arg(long, value_name = "N")]
    window: Option<usize>,

    /// Statistic compared against the threshold
    #[arg(long, value_enum)]
    criterion: Option<CriterionArg>,

    /// Levels for the inconsistency statistic
    #[arg(long)]
    depth: Option<usize>,

    /// Round scores to 0/1 before clustering
    #[arg(long)]
    binarize: bool,

    /// Documents to process (default: every document in the key)
    #[arg(long, short = 'n')]
    iterations: Option<usize>,

    /// Documents processed concurrently
    #[arg(long, short = 'j')]
    workers: Option<usize>,

    /// Do not write linkage trees
    #[arg(long)]
    no_linkage: bool,

    /// Stop at the first document that fails
    #[arg(long)]
    abort_on_missing: bool,

    /// Print the pass summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Suppress status output
    #[arg(long, short)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CriterionArg {
    /// Cophenetic distance
    Distance,
    /// Inconsistency coefficient
    Inconsistent,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result: Result<(), String> = match cli.command {
        Commands::Run(args) => run_pass(
            CacheMode::ComputeAndCache,
            &args.pass,
            Some(args.scores),
            args.cluster_gold,
        ),
        Commands::Cut(args) => run_pass(CacheMode::CutOnly, &args, None, false),
        Commands::Recluster(args) => run_pass(CacheMode::ReclusterFromRaw, &args, None, false),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", color("31", "error:"), e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Command Handlers
// ============================================================================

fn run_pass(
    mode: CacheMode,
    args: &PassArgs,
    scores: Option<PathBuf>,
    cluster_gold: bool,
) -> Result<(), String> {
    let key_text = fs::read_to_string(&args.key)
        .map_err(|e| format_error(&format!("read key {}", args.key.display()), &e.to_string()))?;
    let index = DocumentIndex::from_bracket_text(&key_text)
        .map_err(|e| format_error(&format!("parse key {}", args.key.display()), &e.to_string()))?;

    let config = build_config(args, mode, cluster_gold, index.len())?;
    let mut cache = ResultCache::open(&args.out)
        .map_err(|e| format_error(&format!("open cache {}", args.out.display()), &e.to_string()))?;
    if let Some(dir) = &args.responses {
        cache = cache
            .with_response_dir(dir)
            .map_err(|e| format_error(&format!("create {}", dir.display()), &e.to_string()))?;
    }

    log_info(
        &format!(
            "{} documents in key, {:?}, t = {}, {:?}",
            index.len(),
            config.mode,
            config.threshold,
            config.criterion
        ),
        args.quiet,
    );

    let pipeline = Pipeline::new(config, cache, index).map_err(|e| e.to_string())?;
    let start = Instant::now();
    let summary = match scores {
        Some(path) => {
            let file = File::open(&path)
                .map_err(|e| format_error(&format!("open {}", path.display()), &e.to_string()))?;
            let mut source = JsonlSource::new(BufReader::new(file));
            pipeline.run(&mut source, &PrecomputedScorer)
        }
        None => pipeline.run_offline(),
    }
    .map_err(|e| e.to_string())?;

    log_info(
        &format!("Finished in {:.2}s", start.elapsed().as_secs_f64()),
        args.quiet,
    );

    if args.json {
        let json = summary.to_json().map_err(|e| e.to_string())?;
        println!("{}", json);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn build_config(
    args: &PassArgs,
    mode: CacheMode,
    cluster_gold: bool,
    key_documents: usize,
) -> Result<PipelineConfig, String> {
    // every document in the key unless the file or a flag says otherwise
    let base = PipelineConfig::default().with_iterations(key_documents.max(1));
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file_over(path, &base)
            .map_err(|e| format_error(&format!("load config {}", path.display()), &e.to_string()))?,
        None => base,
    };
    config = config.with_mode(mode);

    if let Some(t) = args.threshold {
        config = config.with_threshold(t);
    }
    if let Some(n) = args.window {
        config = config.with_aggregation(AggregationPolicy::LastN(n));
    }
    let depth = args.depth.unwrap_or(match config.criterion {
        CutCriterion::Inconsistent { depth } => depth,
        CutCriterion::Distance => DEFAULT_INCONSISTENCY_DEPTH,
    });
    match args.criterion {
        Some(CriterionArg::Distance) => config = config.with_criterion(CutCriterion::Distance),
        Some(CriterionArg::Inconsistent) => {
            config = config.with_criterion(CutCriterion::Inconsistent { depth })
        }
        None => {
            if let CutCriterion::Inconsistent { .. } = config.criterion {
                config = config.with_criterion(CutCriterion::Inconsistent { depth });
            }
        }
    }
    if args.binarize {
        config = config.with_binarize(true);
    }
    if let Some(n) = args.iterations {
        config = config.with_iterations(n);
    }
    if let Some(j) = args.workers {
        config = config.with_workers(j);
    }
    if args.no_linkage {
        config = config.with_persist_linkage(false);
    }
    if args.abort_on_missing {
        config = config.with_on_missing(MissingPolicy::Abort);
    }
    if cluster_gold {
        config = config.with_cluster_gold(true);
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_summary(summary: &PassSummary) {
    println!(
        "{} {}  {} {}  {} {}  {} {}",
        color("32", "written:"),
        summary.written(),
        color("33", "already present:"),
        summary.already_present(),
        color("33", "duplicates:"),
        summary.duplicates.len(),
        color("31", "failed:"),
        summary.failed.len()
    );
    for failure in &summary.failed {
        println!("  {} {}", failure.doc_id, color("2", &failure.error));
    }
    if let Some(gold) = gold_cluster_totals(summary) {
        println!("clusters: {} predicted, {} gold", gold.0, gold.1);
    }
    if let Some(report) = &summary.report {
        println!();
        println!("{}", color("1", "Pairwise evaluation"));
        println!("{}", report);
    }
}

fn gold_cluster_totals(summary: &PassSummary) -> Option<(usize, usize)> {
    let mut predicted = 0;
    let mut gold = 0;
    let mut any = false;
    for doc in &summary.documents {
        if let Some(g) = doc.gold_clusters {
            any = true;
            gold += g;
            predicted += doc.clusters;
        }
    }
    any.then_some((predicted, gold))
}

/// Format error message consistently
fn format_error(operation: &str, details: &str) -> String {
    format!("Failed to {}: {}", operation, details)
}

/// Log info message (respects quiet flag)
fn log_info(msg: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", msg);
    }
}

fn color(code: &str, text: &str) -> String {
    if io::stdout().is_terminal() {
        format!("\x1b[{}m{}\x1b[0m", code, text)
    } else {
        text.to_string()
    }
}
