//! `launchgate patterns`

use clap::Args;

use super::Context;
use crate::output;

#[derive(Args)]
pub struct PatternsArgs {
    /// Target URL
    pub url: String,
}

pub async fn execute(args: PatternsArgs, ctx: &Context) -> anyhow::Result<i32> {
    let runner = ctx.runner(ctx.load_config()?).await?;
    let patterns = runner.analyze_patterns(&args.url).await?;

    if ctx.format.is_structured() {
        output::print_value(&patterns, ctx.format);
        return Ok(0);
    }
    if patterns.is_empty() {
        output::print_info("No recurring patterns in recent runs");
        return Ok(0);
    }

    output::print_list(&patterns, ctx.format);
    for pattern in &patterns {
        println!();
        println!("{} ({})", pattern.summary, pattern.subject);
        println!("  why it matters: {}", pattern.why_it_matters);
        println!("  runs: {}", pattern.evidence.run_ids.join(", "));
        for limit in &pattern.limits {
            println!("  limit: {}", limit);
        }
    }
    Ok(0)
}
