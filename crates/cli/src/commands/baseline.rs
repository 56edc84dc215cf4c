//! `launchgate baseline`

use clap::Subcommand;
use launchgate_common::{parse_target_url, site_key, Baseline};
use serde::Serialize;

use super::Context;
use crate::output::{self, TableDisplay};

#[derive(Subcommand)]
pub enum BaselineCommands {
    /// Replace the site's baseline with a stored run
    Save {
        /// Target URL
        url: String,

        /// Run to promote (latest run when omitted)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Show the site's current baseline
    Show {
        /// Target URL
        url: String,
    },
}

#[derive(Serialize)]
#[serde(transparent)]
struct BaselineRow(Baseline);

impl TableDisplay for BaselineRow {
    fn headers() -> Vec<&'static str> {
        vec!["SITE", "RUN", "CREATED", "VERDICT", "INTENT", "GOAL", "CRITICAL STEPS"]
    }

    fn row(&self) -> Vec<String> {
        let b = &self.0;
        vec![
            b.site_key.clone(),
            b.source_run_id.clone(),
            b.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            b.verdict.to_string(),
            b.detected_intent.to_string(),
            if b.goal_reached { "reached" } else { "missed" }.to_string(),
            b.critical_path.len().to_string(),
        ]
    }
}

pub async fn execute(cmd: BaselineCommands, ctx: &Context) -> anyhow::Result<i32> {
    match cmd {
        BaselineCommands::Save { url, run_id } => {
            let runner = ctx.runner(ctx.load_config()?).await?;
            let baseline = runner.save_baseline(&url, run_id.as_deref()).await?;
            if ctx.format.is_structured() {
                output::print_value(&baseline, ctx.format);
            } else {
                output::print_success(&format!(
                    "Baseline for {} now points at run {}",
                    baseline.site_key, baseline.source_run_id
                ));
            }
        }

        BaselineCommands::Show { url } => {
            let site = site_key(&parse_target_url(&url)?);
            let store = ctx.open_store().await?;
            match store.load_baseline(&site).await? {
                Some(baseline) => output::print_item(&BaselineRow(baseline), ctx.format),
                None => output::print_info(&format!("No baseline recorded for {}", site)),
            }
        }
    }
    Ok(0)
}
