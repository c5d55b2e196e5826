//! Fabula Enrichment Runner
//!
//! Run the metadata-extraction pipeline over narrative chunks.
//!
//! Usage:
//!   cargo run --bin fabula-enrich -- --missing
//!   cargo run --bin fabula-enrich -- --range 120..180 --dry-run
//!   cargo run --bin fabula-enrich -- --chunk 8b1e... --replicates 3

use std::env;
use std::sync::Arc;

use uuid::Uuid;

use fabula_db::{create_pool, PgChunkSource, PgMetadataRepository};
use fabula_enrich::{EnrichConfig, Enricher, ReplicateMode, Selection};
use fabula_inference::OllamaBackend;

#[derive(Debug, Default)]
struct Args {
    selection: Option<Selection>,
    batch_size: Option<usize>,
    tokens_before: Option<usize>,
    tokens_after: Option<usize>,
    replicates: Option<usize>,
    consensus: bool,
    concurrency: Option<usize>,
    dry_run: bool,
}

fn parse_range(raw: &str) -> Option<Selection> {
    let (start, end) = raw.split_once("..")?;
    Some(Selection::Range {
        start_seq: start.trim().parse().ok()?,
        end_seq: end.trim().parse().ok()?,
    })
}

/// Selection flags are mutually exclusive; a second one is a usage error.
fn set_selection(result: &mut Args, selection: Selection) -> Result<(), String> {
    if result.selection.is_some() {
        return Err("only one of --all, --missing, --range, --chunk may be given".to_string());
    }
    result.selection = Some(selection);
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--all" => {
                set_selection(&mut result, Selection::All)?;
            }
            "--missing" => {
                set_selection(&mut result, Selection::MissingMetadata)?;
            }
            "--range" => {
                i += 1;
                if i >= args.len() {
                    return Err("--range requires A..B".to_string());
                }
                let range = parse_range(&args[i])
                    .ok_or_else(|| format!("invalid range: {}", args[i]))?;
                set_selection(&mut result, range)?;
            }
            "--chunk" => {
                i += 1;
                if i >= args.len() {
                    return Err("--chunk requires a UUID".to_string());
                }
                let id = Uuid::parse_str(&args[i])
                    .map_err(|_| format!("invalid chunk id: {}", args[i]))?;
                set_selection(&mut result, Selection::Single(id))?;
            }
            "--batch-size" | "-b" => {
                i += 1;
                if i < args.len() {
                    result.batch_size = args[i].parse().ok();
                }
            }
            "--before" => {
                i += 1;
                if i < args.len() {
                    result.tokens_before = args[i].parse().ok();
                }
            }
            "--after" => {
                i += 1;
                if i < args.len() {
                    result.tokens_after = args[i].parse().ok();
                }
            }
            "--replicates" | "-r" => {
                i += 1;
                if i < args.len() {
                    result.replicates = args[i].parse().ok();
                }
            }
            "--consensus" => {
                result.consensus = true;
            }
            "--concurrency" | "-c" => {
                i += 1;
                if i < args.len() {
                    result.concurrency = args[i].parse().ok();
                }
            }
            "--dry-run" | "-n" => {
                result.dry_run = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {}", other));
            }
        }
        i += 1;
    }

    if result.selection.is_none() {
        return Err("one of --all, --missing, --range, --chunk is required".to_string());
    }

    Ok(result)
}

fn print_help() {
    println!(
        r#"
Fabula Enrichment Runner

Usage: fabula-enrich <SELECTION> [OPTIONS]

Selection (exactly one):
      --all               Enrich every chunk
      --missing           Enrich chunks with no metadata record
      --range <A..B>      Enrich chunks with sequence in [A, B]
      --chunk <UUID>      Enrich a single chunk

Options:
  -b, --batch-size <N>    Chunks per batch (default: 20)
      --before <TOKENS>   Before-context token budget (default: 4000)
      --after <TOKENS>    After-context token budget (default: 2000)
  -r, --replicates <N>    Generations per chunk (default: 1)
      --consensus         Combine replicates by consensus instead of first-wins
  -c, --concurrency <N>   Concurrent pipelines per batch (default: 4)
  -n, --dry-run           Full pipeline, no store writes
  -h, --help              Print help

Environment Variables:
  DATABASE_URL        PostgreSQL connection string (required)
  OLLAMA_BASE         Ollama server URL (default: http://127.0.0.1:11434)
  OLLAMA_GEN_MODEL    Generation model (default: gpt-oss:20b)
  RUST_LOG            Log filter (default: info)

Exit codes:
  0  all selected chunks persisted
  1  one or more chunks failed
  2  fatal error (bad arguments, storage unavailable)
"#
    );
}

fn build_config(args: &Args) -> EnrichConfig {
    let mut config = EnrichConfig::from_env();
    if let Some(batch_size) = args.batch_size {
        config = config.with_batch_size(batch_size);
    }
    if args.tokens_before.is_some() || args.tokens_after.is_some() {
        let tokens_before = args.tokens_before.unwrap_or(config.tokens_before);
        let tokens_after = args.tokens_after.unwrap_or(config.tokens_after);
        config = config.with_window(tokens_before, tokens_after);
    }
    if let Some(replicates) = args.replicates {
        let mode = if args.consensus {
            ReplicateMode::Consensus
        } else {
            ReplicateMode::First
        };
        config = config.with_replicates(replicates, mode);
    } else if args.consensus {
        let replicates = config.replicates;
        config = config.with_replicates(replicates, ReplicateMode::Consensus);
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    config.with_dry_run(args.dry_run)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let argv: Vec<String> = env::args().collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("run with --help for usage");
            std::process::exit(2);
        }
    };

    let database_url = match env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("error: DATABASE_URL is not set");
            std::process::exit(2);
        }
    };

    let pool = match create_pool(&database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("error: failed to connect to database: {}", e);
            std::process::exit(2);
        }
    };

    let config = build_config(&args);
    let selection = args.selection.clone().unwrap_or(Selection::MissingMetadata);

    let enricher = Enricher::new(
        Arc::new(PgChunkSource::new(pool.clone())),
        Arc::new(PgMetadataRepository::new(pool)),
        Arc::new(OllamaBackend::from_env()),
        config,
    );

    let report = match enricher.run(selection).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    };

    println!(
        "{} chunks: {} persisted, {} failed, {} skipped{}",
        report.total_chunks,
        report.persisted,
        report.failed,
        report.skipped,
        if report.dry_run { " (dry run)" } else { "" },
    );
    println!(
        "{} attempts, {} input + {} output tokens, cost {:.4}",
        report.attempts, report.input_tokens, report.output_tokens, report.total_cost,
    );
    for failure in &report.failures {
        println!("  failed {}: {}", failure.chunk_id, failure.reason);
    }

    if let Some(fatal) = &report.fatal_error {
        eprintln!("fatal: {}", fatal);
        std::process::exit(2);
    }
    if report.has_failures() {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("fabula-enrich")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_selection_flag_required() {
        let err = parse_args(&argv(&["--dry-run"])).unwrap_err();
        assert!(err.contains("required"));
    }

    #[test]
    fn test_duplicate_selection_flags_rejected() {
        let err = parse_args(&argv(&["--all", "--missing"])).unwrap_err();
        assert!(err.contains("only one"));

        let err = parse_args(&argv(&["--range", "10..20", "--all"])).unwrap_err();
        assert!(err.contains("only one"));
    }

    #[test]
    fn test_range_selection_parsed() {
        let args = parse_args(&argv(&["--range", "120..180", "-n"])).unwrap();
        assert_eq!(
            args.selection,
            Some(Selection::Range {
                start_seq: 120,
                end_seq: 180
            })
        );
        assert!(args.dry_run);
    }
}
