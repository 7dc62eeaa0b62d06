//! Jury - multi-model evaluation CLI
//!
//! The `jury` command drives the evaluation engine against a panel of
//! scripted judge models described in a config file.
//!
//! ## Commands
//!
//! - `run`: ask every model one prompt and aggregate their scores
//! - `steps`: run a chain of prompts, dropping models that fail a step
//! - `aggregate`: apply an aggregation strategy to literal scores

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jury_core::{
    render_score_chart, render_timeline, AggregatedExecutionResult, EvaluationStep,
    ExecutionRequest, JuryMetric, LoggingListener, ModelError, ModelExclusionEvent,
    MultiModelExecutor, ScoreAggregator, StepInput, StepReport, METRICS,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, Level};

use crate::config::JuryConfig;

#[derive(Parser)]
#[command(name = "jury")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fan an evaluation out to several judge models and aggregate the verdicts", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "JURY_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one prompt to every configured model and aggregate the scores
    Run {
        /// Panel config file (.json or .toml)
        #[arg(short, long, env = "JURY_CONFIG")]
        config: PathBuf,

        /// Prompt sent to every model
        #[arg(short, long)]
        prompt: String,

        /// Metric name used in reports
        #[arg(short, long, default_value = "adhoc")]
        metric: String,

        /// Aggregation strategy (default: the config's default_aggregator)
        #[arg(short, long)]
        strategy: Option<ScoreAggregator>,

        /// JSON pointer to the score inside each model reply
        #[arg(long, default_value = "/score")]
        score_path: String,

        /// Chart width in cells
        #[arg(long, default_value = "40")]
        width: usize,

        /// Output format
        #[arg(long, value_enum, default_value = "chart")]
        format: OutputFormat,
    },

    /// Run prompts in sequence; a model failing any step is dropped
    Steps {
        /// Panel config file (.json or .toml)
        #[arg(short, long, env = "JURY_CONFIG")]
        config: PathBuf,

        /// Step as NAME=PROMPT; repeat for each step, in order
        #[arg(short = 'S', long = "step", required = true, value_parser = parse_step)]
        steps: Vec<(String, String)>,

        /// Metric name used in reports
        #[arg(short, long, default_value = "adhoc")]
        metric: String,

        /// Aggregation strategy (default: the config's default_aggregator)
        #[arg(short, long)]
        strategy: Option<ScoreAggregator>,

        /// JSON pointer to the score inside each model reply
        #[arg(long, default_value = "/score")]
        score_path: String,

        /// Output format
        #[arg(long, value_enum, default_value = "chart")]
        format: OutputFormat,
    },

    /// Aggregate literal scores with a strategy
    Aggregate {
        /// average, median, min, max, majority_voting or consensus:<tolerance>
        #[arg(short, long, default_value = "average")]
        strategy: ScoreAggregator,

        /// Scores to aggregate
        #[arg(required = true, allow_negative_numbers = true)]
        scores: Vec<f64>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Score chart and timeline
    Chart,
    /// Full result as JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    jury_core::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Run {
            config,
            prompt,
            metric,
            strategy,
            score_path,
            width,
            format,
        } => {
            cmd_run(
                &config,
                &prompt,
                &metric,
                strategy,
                &score_path,
                width,
                format,
            )
            .await
        }
        Commands::Steps {
            config,
            steps,
            metric,
            strategy,
            score_path,
            format,
        } => cmd_steps(&config, steps, &metric, strategy, &score_path, format).await,
        Commands::Aggregate { strategy, scores } => cmd_aggregate(&strategy, &scores),
    };

    METRICS.flush();
    outcome
}

fn parse_step(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, prompt)) if !name.trim().is_empty() && !prompt.trim().is_empty() => {
            Ok((name.trim().to_string(), prompt.to_string()))
        }
        _ => Err(format!("expected NAME=PROMPT, got '{raw}'")),
    }
}

/// Read the score at `pointer` in a reply; numbers and numeric strings count.
fn score_at(reply: &Value, pointer: &str) -> f64 {
    match reply.pointer(pointer) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => f64::NAN,
    }
}

fn build_executor(config: &JuryConfig) -> Result<Arc<MultiModelExecutor>> {
    let executor = MultiModelExecutor::with_config(config.registry(), config.executor.clone())
        .context("Failed to build executor")?;
    Ok(Arc::new(executor))
}

async fn cmd_run(
    config_path: &Path,
    prompt: &str,
    metric: &str,
    strategy: Option<ScoreAggregator>,
    score_path: &str,
    width: usize,
    format: OutputFormat,
) -> Result<()> {
    let config = JuryConfig::load(config_path)?;
    let executor = build_executor(&config)?;
    let aggregator = strategy.unwrap_or_else(|| config.executor.default_aggregator.clone());
    info!(metric = %metric, strategy = %aggregator, models = config.models.len(), "running batch");

    if format == OutputFormat::Chart {
        executor
            .listeners()
            .register(LoggingListener::new().without_charts().into_listener());
    }

    let pointer = score_path.to_string();
    let request = ExecutionRequest::new(metric, prompt, config.model_ids(), move |reply: &Value| {
        score_at(reply, &pointer)
    });
    let result = executor
        .execute(request, &aggregator)
        .await
        .with_context(|| format!("Metric '{metric}' failed"))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Chart => {
            println!("{}", render_score_chart(&result, width));
            println!();
            println!("{}", render_timeline(&result.results, width));
            println!();
            println!(
                "success rate: {:.0}% ({}/{})",
                result.success_rate() * 100.0,
                result.success_count(),
                result.results.len()
            );
            for failed in result.failed() {
                if let Some(err) = failed.error() {
                    println!("  {}: {}", failed.model_id(), err);
                }
            }
        }
    }
    Ok(())
}

async fn cmd_steps(
    config_path: &Path,
    steps: Vec<(String, String)>,
    metric: &str,
    strategy: Option<ScoreAggregator>,
    score_path: &str,
    format: OutputFormat,
) -> Result<()> {
    let config = JuryConfig::load(config_path)?;
    let executor = build_executor(&config)?;
    let mut jury = JuryMetric::new(metric, executor, config.model_ids());
    if let Some(aggregator) = strategy {
        jury = jury.with_aggregator(aggregator);
    }
    jury.add_listener(LoggingListener::new().without_charts().into_listener());

    let plan: Vec<EvaluationStep<f64>> = steps
        .into_iter()
        .map(|(name, prompt)| prompt_step(name, prompt, score_path.to_string()))
        .collect();

    let evaluation = jury
        .evaluate_steps(f64::NAN, plan, |score: &f64| *score)
        .await
        .with_context(|| format!("Metric '{metric}' failed"))?;

    match format {
        OutputFormat::Json => {
            let summary = StepsSummary {
                aggregated: &evaluation.aggregated,
                exclusions: &evaluation.exclusions,
                steps: &evaluation.steps,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Chart => {
            println!("{}", render_score_chart(&evaluation.aggregated, 40));
            println!();
            for step in &evaluation.steps {
                println!(
                    "step {}/{} {:<12} {:<9} {}/{} ok, {} ms",
                    step.step_index + 1,
                    step.total_steps,
                    step.step_name,
                    step.kind.to_string(),
                    step.success_count(),
                    step.results.len(),
                    step.max_duration().as_millis()
                );
            }
            for exclusion in &evaluation.exclusions {
                println!(
                    "excluded {} at step {} ({}): {}",
                    exclusion.model_id,
                    exclusion.step_index + 1,
                    exclusion.step_name,
                    exclusion.error
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StepsSummary<'a> {
    aggregated: &'a AggregatedExecutionResult<f64>,
    exclusions: &'a [ModelExclusionEvent],
    steps: &'a [StepReport],
}

/// A step that sends `prompt` and keeps the reply's score as the state.
fn prompt_step(name: String, prompt: String, score_path: String) -> EvaluationStep<f64> {
    let request = prompt.clone();
    EvaluationStep::llm(name, request, move |input: StepInput<f64>| {
        let prompt = prompt.clone();
        let score_path = score_path.clone();
        async move {
            let reply: Value = input.invoke(&prompt).await?;
            let score = score_at(&reply, &score_path);
            if score.is_finite() {
                Ok(score)
            } else {
                Err(ModelError::InvalidScore {
                    model_id: input.model_id.clone(),
                    score,
                })
            }
        }
    })
}

fn cmd_aggregate(strategy: &ScoreAggregator, scores: &[f64]) -> Result<()> {
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        bail!("Scores must be finite numbers, got {bad}");
    }
    let score = strategy.aggregate(scores)?;
    println!("{strategy}: {score}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn panel(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("panel.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            json!({
                "executor": { "default_aggregator": { "type": "average" } },
                "models": [
                    { "id": "a", "behavior": { "type": "reply", "value": { "score": 0.4 } } },
                    {
                        "id": "b",
                        "behavior": { "type": "reply", "value": { "score": "0.8" } },
                        "rules": [{ "contains": "verify", "behavior": { "type": "fail", "message": "nope" } }]
                    }
                ]
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        path
    }

    #[test]
    fn step_argument_parses_name_and_prompt() {
        assert_eq!(
            parse_step("extract=list the claims").unwrap(),
            ("extract".to_string(), "list the claims".to_string())
        );
        assert_eq!(
            parse_step("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_step("no-separator").is_err());
        assert!(parse_step("=prompt").is_err());
    }

    #[test]
    fn score_at_reads_numbers_and_numeric_strings() {
        assert_eq!(score_at(&json!({ "score": 0.5 }), "/score"), 0.5);
        assert_eq!(score_at(&json!({ "v": { "s": "0.25" } }), "/v/s"), 0.25);
        assert_eq!(score_at(&json!({ "ok": true }), "/ok"), 1.0);
        assert!(score_at(&json!({}), "/score").is_nan());
    }

    #[test]
    fn cli_parses_strategy_and_negative_scores() {
        let cli = Cli::try_parse_from(["jury", "aggregate", "-s", "consensus:0.5", "0.1", "-0.2"])
            .unwrap();
        match cli.command {
            Commands::Aggregate { strategy, scores } => {
                assert_eq!(strategy, ScoreAggregator::consensus(0.5));
                assert_eq!(scores, vec![0.1, -0.2]);
            }
            _ => panic!("expected aggregate"),
        }
    }

    #[test]
    fn aggregate_surfaces_consensus_failure() {
        assert!(cmd_aggregate(&ScoreAggregator::Median, &[0.1, 0.9, 0.5]).is_ok());
        assert!(cmd_aggregate(&ScoreAggregator::consensus(0.1), &[0.1, 0.9]).is_err());
    }

    #[tokio::test]
    async fn run_command_completes_against_scripted_panel() {
        let dir = tempfile::tempdir().unwrap();
        let path = panel(&dir);
        cmd_run(&path, "rate it", "relevance", None, "/score", 20, OutputFormat::Json)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn steps_command_survives_an_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let path = panel(&dir);
        cmd_steps(
            &path,
            vec![
                ("extract".to_string(), "extract claims".to_string()),
                ("verify".to_string(), "verify claims".to_string()),
            ],
            "faithfulness",
            Some(ScoreAggregator::Max),
            "/score",
            OutputFormat::Chart,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_command_reports_missing_config() {
        let err = cmd_run(
            Path::new("/nonexistent/panel.json"),
            "p",
            "m",
            None,
            "/score",
            20,
            OutputFormat::Chart,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
