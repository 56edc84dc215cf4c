//! `launchgate run`

use anyhow::Context as _;
use clap::Args;
use colored::Colorize;
use launchgate_common::Snapshot;
use launchgate_engine::presets::{self, PRESET_NAMES};
use launchgate_engine::{
    AttemptDefinition, BrowserDriver, EngineConfig, PlaywrightBrowser, RuleSet, RunRequest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Target URL
    pub url: String,

    /// Built-in attempt preset (smoke when no attempts file is given)
    #[arg(short, long, value_parser = clap::builder::PossibleValuesParser::new(PRESET_NAMES.iter().copied()))]
    pub preset: Option<String>,

    /// Attempt definition file or directory of YAML files
    #[arg(short, long)]
    pub attempts: Option<PathBuf>,

    /// Additional rules (JSON) appended to the built-in set
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Attempts in flight at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Stop dispatching after a critical failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Attempt ids to skip
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Only run these attempt ids
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

pub async fn execute(args: RunArgs, ctx: &Context) -> anyhow::Result<i32> {
    let config = apply_overrides(ctx.load_config()?, &args);
    config.validate()?;

    let (preset, attempts) = resolve_attempts(args.preset.as_deref(), args.attempts.as_deref())?;
    let rules = RuleSet::load(args.rules.as_deref()).context("failed to load rules")?;
    debug!("{} attempts, {} rules", attempts.len(), rules.len());

    let runner = ctx.runner(config.clone()).await?;
    let browser = PlaywrightBrowser::launch(config.browser.clone())
        .await
        .context("failed to start the browser")?;
    let driver: Arc<dyn BrowserDriver> = Arc::new(browser);

    let report = runner
        .run(
            driver,
            RunRequest {
                url: args.url,
                attempts,
                preset,
                rules,
            },
        )
        .await?;
    info!("Snapshot written to {}", report.snapshot_path);

    if ctx.format.is_structured() {
        output::print_value(&report.snapshot, ctx.format);
    } else {
        print_summary(&report.snapshot, ctx.format);
    }
    Ok(report.exit_code())
}

fn apply_overrides(mut config: EngineConfig, args: &RunArgs) -> EngineConfig {
    if let Some(concurrency) = args.concurrency {
        config.engine.concurrency = concurrency;
    }
    if args.fail_fast {
        config.engine.fail_fast = true;
    }
    if args.headed {
        config.browser.headless = false;
    }
    config.policy.skip.extend(args.skip.iter().cloned());
    config.policy.only.extend(args.only.iter().cloned());
    config
}

/// Preset attempts followed by file attempts; smoke when neither is given
fn resolve_attempts(
    preset: Option<&str>,
    file: Option<&Path>,
) -> anyhow::Result<(Option<String>, Vec<AttemptDefinition>)> {
    let preset = match (preset, file) {
        (None, None) => Some("smoke"),
        (p, _) => p,
    };

    let mut attempts = match preset {
        Some(name) => presets::preset(name)?,
        None => Vec::new(),
    };
    if let Some(path) = file {
        let loaded = if path.is_dir() {
            AttemptDefinition::load_all(path)
        } else {
            AttemptDefinition::from_file(path)
        }
        .with_context(|| format!("failed to load attempts from {}", path.display()))?;
        attempts.extend(loaded);
    }
    Ok((preset.map(str::to_string), attempts))
}

fn print_summary(snapshot: &Snapshot, format: OutputFormat) {
    let decision = &snapshot.decision;
    println!(
        "{} {}  (confidence {:.0}%)",
        "Verdict:".bold(),
        output::verdict_label(decision.final_verdict),
        snapshot.meta.verdict_confidence * 100.0
    );
    println!(
        "Site: {} [{}], run {} in {}ms",
        snapshot.meta.url, snapshot.crawl.detected_intent, snapshot.meta.run_id, snapshot.meta.duration_ms
    );
    if !snapshot.crawl.reachable {
        output::print_warning("Landing page was not reachable");
    }

    if !decision.reasons.is_empty() {
        println!();
        println!("{}", "Reasons:".bold());
        for entry in &decision.reasons {
            println!("  - [{}] {}", entry.rule_id, entry.reason);
        }
    }

    println!();
    output::print_list(&snapshot.attempts, format);

    if !snapshot.market_impact.risks.is_empty() {
        println!();
        println!("{}", "Market impact:".bold());
        output::print_list(&snapshot.market_impact.risks, format);
    }

    if let Some(baseline) = &snapshot.baseline {
        println!();
        if baseline.created {
            output::print_info(&format!("Baseline created from run {}", snapshot.meta.run_id));
        } else if let Some(drift) = baseline.comparison.as_ref().filter(|c| c.drift_detected) {
            output::print_warning(&format!(
                "Drift from baseline {}:",
                baseline.baseline_run_id
            ));
            for reason in &drift.reasons {
                println!("  - {}", reason);
            }
        } else {
            output::print_success(&format!(
                "No drift from baseline {}",
                baseline.baseline_run_id
            ));
        }
    }
}
