//! Tensor-graph compiler CLI.
//!
//! Provides the `tgc` binary with subcommands for working with tensor
//! programs: `compile` runs the full pipeline (optimize, cache, lower,
//! codegen, build) over a graph-exchange-format document; `inspect`
//! traces a graph and prints its operator list and usage map for
//! debugging.

mod error;
mod graph_io;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use tgc_codegen::{batch_build, BuildInstance};
use tgc_passes::{run_pipeline, MmaKind, ParallelK, PassContext, Precision, ReducePrecision};

use error::CliError;
use graph_io::{build_flow_graph, load_graph_doc};

#[derive(Parser)]
#[command(name = "tgc", about = "Tensor-graph optimizing compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize, build, and cache a graph's operators.
    Compile {
        /// Path to the graph-exchange-format JSON document.
        #[arg(long)]
        graph: PathBuf,

        /// Root directory for the graph cache and build artifacts.
        #[arg(long)]
        cache_root: PathBuf,

        /// Model name, used as a cache-directory component.
        #[arg(long)]
        model: String,

        /// Batch size, used as a cache-directory component.
        #[arg(long)]
        batch_size: u32,

        /// Numeric precision: f16, bf16, or f32.
        #[arg(long, default_value = "f32")]
        precision: String,

        /// Reduction accumulator precision: f16 or f32.
        #[arg(long, default_value = "f32")]
        reduce_precision: String,

        /// Matrix-multiply-accumulate strategy: simt, wmma, or mma.
        #[arg(long, default_value = "simt")]
        mma: String,

        /// Parallel-K reduction strategy: off, default, search, or a fixed split factor.
        #[arg(long, default_value = "default")]
        parallel_k: String,

        /// Search-space level: 0, 1, or 2.
        #[arg(long, default_value_t = 0)]
        space_level: u8,

        #[arg(long)]
        verbose: bool,
    },
    /// Trace a graph and print its operator list and usage map.
    Inspect {
        /// Path to the graph-exchange-format JSON document.
        #[arg(long)]
        graph: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Compile {
            graph,
            cache_root,
            model,
            batch_size,
            precision,
            reduce_precision,
            mma,
            parallel_k,
            space_level,
            verbose,
        } => {
            init_tracing(verbose);
            run_compile(&graph, &cache_root, &model, batch_size, &precision, &reduce_precision, &mma, &parallel_k, space_level, verbose)
        }
        Commands::Inspect { graph } => {
            init_tracing(false);
            run_inspect(&graph)
        }
    };
    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_precision(s: &str) -> Result<Precision, CliError> {
    Ok(match s {
        "f16" => Precision::F16,
        "bf16" => Precision::BF16,
        "f32" => Precision::F32,
        other => return Err(CliError::InvalidOption { flag: "precision", value: other.to_string() }),
    })
}

fn parse_reduce_precision(s: &str) -> Result<ReducePrecision, CliError> {
    Ok(match s {
        "f16" => ReducePrecision::F16,
        "f32" => ReducePrecision::F32,
        other => return Err(CliError::InvalidOption { flag: "reduce-precision", value: other.to_string() }),
    })
}

fn parse_mma(s: &str) -> Result<MmaKind, CliError> {
    Ok(match s {
        "simt" => MmaKind::Simt,
        "wmma" => MmaKind::Wmma,
        "mma" => MmaKind::Mma,
        other => return Err(CliError::InvalidOption { flag: "mma", value: other.to_string() }),
    })
}

fn parse_parallel_k(s: &str) -> Result<ParallelK, CliError> {
    Ok(match s {
        "off" => ParallelK::Disabled,
        "default" => ParallelK::Default,
        "search" => ParallelK::Search,
        fixed => fixed
            .parse::<u32>()
            .map(ParallelK::Fixed)
            .map_err(|_| CliError::InvalidOption { flag: "parallel-k", value: fixed.to_string() })?,
    })
}

#[allow(clippy::too_many_arguments)]
fn run_compile(
    graph_path: &Path,
    cache_root: &Path,
    model: &str,
    batch_size: u32,
    precision: &str,
    reduce_precision: &str,
    mma: &str,
    parallel_k: &str,
    space_level: u8,
    verbose: bool,
) -> i32 {
    match try_run_compile(graph_path, cache_root, model, batch_size, precision, reduce_precision, mma, parallel_k, space_level, verbose) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn try_run_compile(
    graph_path: &Path,
    cache_root: &Path,
    model: &str,
    batch_size: u32,
    precision_str: &str,
    reduce_precision_str: &str,
    mma_str: &str,
    parallel_k_str: &str,
    space_level: u8,
    verbose: bool,
) -> Result<i32, CliError> {
    let precision = parse_precision(precision_str)?;
    let reduce_precision = parse_reduce_precision(reduce_precision_str)?;
    let mma = parse_mma(mma_str)?;
    let parallel_k = parse_parallel_k(parallel_k_str)?;
    let ctx = PassContext::new(precision, reduce_precision, mma, parallel_k, space_level, verbose)?;

    let doc = load_graph_doc(graph_path)?;
    let graph = build_flow_graph(&doc)?;

    let fp = tgc_cache::fingerprint(model, batch_size, precision, reduce_precision, mma, parallel_k, space_level);
    let cache_file = tgc_cache::cache_path(cache_root, model, batch_size, &fp);

    let optimized = match tgc_cache::read_graph(&cache_file) {
        Ok(cached) => {
            tracing::info!(path = %cache_file.display(), "graph cache hit");
            cached
        }
        Err(_) => {
            tracing::info!(path = %cache_file.display(), "graph cache miss, running optimization pipeline");
            let optimized = run_pipeline(graph, &ctx)?;
            tgc_cache::write_graph(&cache_file, &optimized).map_err(CliError::Cache)?;
            optimized
        }
    };

    let registry = tgc_lower::ScheduleRegistry::with_defaults();
    let build_root = cache_root.join("builds").join(model);
    let instances: Vec<BuildInstance> = optimized
        .nodes
        .iter()
        .map(|op| BuildInstance {
            task: op.task.clone(),
            output_dir: build_root.join(&op.task.name),
            keep_ir: false,
            keep_ptx: false,
            verbose,
        })
        .collect();

    let names: Vec<String> = optimized.nodes.iter().map(|op| op.task.name.clone()).collect();
    let results = batch_build(instances, &registry, &ctx);

    let mut failures = 0;
    for (name, result) in names.iter().zip(results.iter()) {
        match result {
            Some(path) => println!("{name}: built {}", path.display()),
            None => {
                println!("{name}: build failed");
                failures += 1;
            }
        }
    }

    if failures == names.len() && !names.is_empty() {
        eprintln!("error: all {failures} task build(s) failed");
        return Ok(1);
    }
    if failures > 0 {
        eprintln!("warning: {failures} of {} task build(s) failed", names.len());
    }
    Ok(0)
}

fn run_inspect(graph_path: &Path) -> i32 {
    match try_run_inspect(graph_path) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

fn try_run_inspect(graph_path: &Path) -> Result<(), CliError> {
    let doc = load_graph_doc(graph_path)?;
    let graph = build_flow_graph(&doc)?;

    println!("operators ({}):", graph.nodes.len());
    for op in &graph.nodes {
        println!("  {} ({} in, {} out, barrier={})", op.name, op.inputs.len(), op.outputs.len(), op.is_barrier);
    }

    println!("usage map:");
    for (key, uses) in graph.usage() {
        println!("  {key:?}: {uses:?}");
    }

    Ok(())
}
