#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arena_harness::compare::{Collector, CompareOptions, Combo, ComparisonRun, ItemStatus};
use arena_harness::pricing::PricingTable;
use arena_harness::prompts::PromptSet;
use arena_harness::registry::ProviderRegistry;
use arena_harness::router::{Message, Router, DEFAULT_TEMPERATURE};
use arena_harness::store::{
    export_preferences_csv, export_results_csv, merge_latest_scores, tally_preferences,
    Envelope, EvalLog, EvaluationRecord, PreferenceSide, ResultRecord, Rubric, ScoreRecord,
    DEFAULT_LOG_PATH,
};

#[derive(Parser)]
#[command(name = "arena", version, about = "Multi-provider LLM comparison arena")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured providers, their availability, and their models
    Providers,
    /// Run one completion against a single provider/model
    Complete {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        prompt: String,
        /// Optional system prompt
        #[arg(long)]
        system: Option<String>,
        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f64,
        /// On failure, retry once on the first available other provider
        #[arg(long)]
        fallback: bool,
    },
    /// Fan one prompt out to several combos and print blind-labeled responses
    Compare {
        #[arg(long)]
        prompt: String,
        /// Provider/model pair, repeatable (e.g. --combo openai/gpt-4o-mini)
        #[arg(long = "combo", required = true)]
        combos: Vec<Combo>,
        /// Optional system prompt sent to every combo
        #[arg(long)]
        system: Option<String>,
        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f64,
        /// Mark the run as not blind in its metadata
        #[arg(long)]
        no_blind: bool,
        /// Evaluation log to append result records to
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log: PathBuf,
        /// Pricing YAML; defaults to the built-in table
        #[arg(long)]
        pricing: Option<PathBuf>,
        /// Print the label-to-identity mapping after the responses
        #[arg(long)]
        reveal: bool,
    },
    /// Append a rubric score for one labeled response of a run
    Score {
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log: PathBuf,
        #[arg(long)]
        run: String,
        #[arg(long)]
        label: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        correctness: u8,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        usefulness: u8,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        clarity: u8,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        safety: u8,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        overall: u8,
        #[arg(long)]
        notes: Option<String>,
        /// Mark this label the run's winner
        #[arg(long)]
        winner: bool,
        #[arg(long, default_value = "anon")]
        scorer: String,
    },
    /// Append a pairwise preference between two labels of a run
    Prefer {
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log: PathBuf,
        #[arg(long)]
        run: String,
        #[arg(long)]
        label_a: String,
        #[arg(long)]
        label_b: String,
        /// Winning label; omit or pass "tie" to record nothing
        #[arg(long)]
        winner: Option<String>,
        #[arg(long, default_value = "anon")]
        scorer: String,
    },
    /// Export flattened CSV tables from the log
    Export {
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log: PathBuf,
        /// Merged result+score CSV output path
        #[arg(long)]
        out_results: Option<PathBuf>,
        /// Flattened preference CSV output path
        #[arg(long)]
        out_preferences: Option<PathBuf>,
        /// Prompt catalog used to resolve prompt ids in the results CSV
        #[arg(long)]
        prompts: Option<PathBuf>,
    },
    /// Print pairwise win tallies per provider/model
    Tally {
        #[arg(long, default_value = DEFAULT_LOG_PATH)]
        log: PathBuf,
    },
    /// List a prompt catalog's entries with fingerprints
    Prompts {
        #[arg(long)]
        catalog: PathBuf,
        /// Keep only prompts carrying at least one of these tags, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Providers => {
            let registry = ProviderRegistry::from_env();
            for provider in registry.providers() {
                let status = if provider.available {
                    "available".to_string()
                } else {
                    format!("missing {}", provider.env_key)
                };
                println!("{} ({})", provider.key, status);
                for model in &provider.models {
                    println!("  {model}");
                }
            }
        }
        Commands::Complete {
            provider,
            model,
            prompt,
            system,
            temperature,
            fallback,
        } => {
            let registry = Arc::new(ProviderRegistry::from_env());
            let router = Router::new(registry.clone())?;
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::user(prompt));
            let text = match router.complete(&provider, &model, &messages, temperature).await {
                Ok(text) => text,
                Err(err) if fallback => {
                    let Some((alt_provider, alt_model)) = registry.fallback_for(&provider)
                    else {
                        return Err(err.to_string().into());
                    };
                    eprintln!("[complete] falling back to {alt_provider}/{alt_model}: {err}");
                    router
                        .complete(alt_provider, alt_model, &messages, temperature)
                        .await
                        .map_err(|e| -> Box<dyn std::error::Error> { e.to_string().into() })?
                }
                Err(err) => return Err(err.to_string().into()),
            };
            println!("{text}");
        }
        Commands::Compare {
            prompt,
            combos,
            system,
            temperature,
            no_blind,
            log,
            pricing,
            reveal,
        } => {
            let registry = Arc::new(ProviderRegistry::from_env());
            let router = Arc::new(Router::new(registry)?);
            let pricing = match pricing {
                Some(path) => PricingTable::load(path)?,
                None => PricingTable::builtin(),
            };
            let collector = Collector::new(router, Arc::new(pricing));
            let options = CompareOptions {
                temperature,
                blind: !no_blind,
                priming_text: system,
            };

            let run = collector
                .compare(&prompt, &combos, &options)
                .await
                .map_err(|e| -> Box<dyn std::error::Error> { e.to_string().into() })?;

            let log = EvalLog::new(log);
            log.append_all(&run.to_result_records())?;
            eprintln!(
                "[compare] {} result records appended to {}",
                run.items.len(),
                log.path().display()
            );

            print_run(&run, reveal);
        }
        Commands::Score {
            log,
            run,
            label,
            correctness,
            usefulness,
            clarity,
            safety,
            overall,
            notes,
            winner,
            scorer,
        } => {
            let log = EvalLog::new(log);
            let results = run_results(&log, &run)?;
            let Some(item) = results.iter().find(|r| r.blind_label == label) else {
                return Err(unknown_label(&label, &run, &results));
            };
            let record = EvaluationRecord::Score(ScoreRecord {
                envelope: Envelope::new(&run, &item.envelope.prompt_sha256),
                blind_label: label.clone(),
                rubric: Rubric {
                    correctness,
                    usefulness,
                    clarity,
                    safety,
                    overall,
                },
                notes,
                is_winner: winner,
                scorer,
            });
            log.append(&record)?;
            println!("scored {label} in {run} (overall {overall})");
        }
        Commands::Prefer {
            log,
            run,
            label_a,
            label_b,
            winner,
            scorer,
        } => {
            let log = EvalLog::new(log);
            let results = run_results(&log, &run)?;
            let side = |label: &str| -> Result<PreferenceSide, Box<dyn Error>> {
                results
                    .iter()
                    .find(|r| r.blind_label == label)
                    .map(|r| PreferenceSide::new(&r.blind_label, &r.provider, &r.model))
                    .ok_or_else(|| unknown_label(label, &run, &results))
            };
            let side_a = side(&label_a)?;
            let side_b = side(&label_b)?;
            let winner = winner
                .as_deref()
                .filter(|w| !w.eq_ignore_ascii_case("tie"));

            let prompt_sha256 = results[0].envelope.prompt_sha256.clone();
            let wrote =
                log.append_preference(&run, &prompt_sha256, side_a, side_b, winner, &scorer)?;
            if wrote {
                println!("recorded preference in {run}: {} wins", winner.unwrap_or_default());
            } else {
                println!("tie, nothing recorded");
            }
        }
        Commands::Export {
            log,
            out_results,
            out_preferences,
            prompts,
        } => {
            if out_results.is_none() && out_preferences.is_none() {
                return Err("export requires --out-results and/or --out-preferences".into());
            }
            let log = EvalLog::new(log);
            let records = log.read_all()?;
            let prompt_index = match prompts {
                Some(path) => Some(
                    PromptSet::load(path)?
                        .fingerprint_index()
                        .into_iter()
                        .map(|(sha, entry)| (sha, entry.id))
                        .collect::<std::collections::HashMap<_, _>>(),
                ),
                None => None,
            };
            if let Some(path) = out_results {
                let rows = merge_latest_scores(&records);
                std::fs::write(&path, export_results_csv(&rows, prompt_index.as_ref()))?;
                eprintln!("[export] {} result rows -> {}", rows.len(), path.display());
            }
            if let Some(path) = out_preferences {
                std::fs::write(&path, export_preferences_csv(&records))?;
                eprintln!("[export] preferences -> {}", path.display());
            }
        }
        Commands::Tally { log } => {
            let log = EvalLog::new(log);
            let records = log.read_all()?;
            let tallies = tally_preferences(&records);
            if tallies.is_empty() {
                println!("no preference records in {}", log.path().display());
            } else {
                println!("{:<45} {:>5} {:>12}", "provider/model", "wins", "appearances");
                for tally in &tallies {
                    println!(
                        "{:<45} {:>5} {:>12}",
                        format!("{}/{}", tally.provider, tally.model),
                        tally.wins,
                        tally.appearances
                    );
                }
            }
        }
        Commands::Prompts { catalog, tags } => {
            let set = PromptSet::load_filtered(&catalog, &tags)?;
            println!("version {} ({} prompts)", set.version, set.prompts.len());
            for prompt in &set.prompts {
                let fingerprint = prompt.fingerprint();
                println!(
                    "{}  {:<20} [{}]",
                    &fingerprint[..12],
                    prompt.id,
                    prompt.tags.join(", ")
                );
            }
        }
    }

    Ok(())
}

/// Result records of one run, oldest first. Errors when the run is absent.
fn run_results(log: &EvalLog, run_id: &str) -> Result<Vec<ResultRecord>, Box<dyn Error>> {
    let results: Vec<ResultRecord> = log
        .read_run(run_id)?
        .into_iter()
        .filter_map(|record| match record {
            EvaluationRecord::Result(result) => Some(result),
            _ => None,
        })
        .collect();
    if results.is_empty() {
        return Err(format!(
            "no result records for run '{run_id}' in {}",
            log.path().display()
        )
        .into());
    }
    Ok(results)
}

fn unknown_label(label: &str, run_id: &str, results: &[ResultRecord]) -> Box<dyn Error> {
    let labels: Vec<&str> = results.iter().map(|r| r.blind_label.as_str()).collect();
    format!(
        "label '{label}' is not part of run '{run_id}'; labels: {}",
        labels.join(", ")
    )
    .into()
}

fn print_run(run: &ComparisonRun, reveal: bool) {
    println!("=== {} ===", run.run_id);
    println!("prompt sha256: {}", run.prompt_sha256);
    println!();
    for item in &run.items {
        println!(
            "--- {} ({} ms, ~{} tokens out, ${:.6}) ---",
            item.blind_label, item.latency_ms, item.output_tokens_est, item.estimated_cost_usd
        );
        match item.status {
            ItemStatus::Ok => println!("{}", item.response_text),
            ItemStatus::Error => {
                println!("[error] {}", item.error.as_deref().unwrap_or("unknown"))
            }
        }
        println!();
    }
    if reveal || !run.blind {
        println!("identities:");
        for (label, combo) in &run.mapping {
            println!("  {label} = {combo}");
        }
    }
}
