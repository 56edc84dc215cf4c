//! LaunchGate decision and concurrency engine
//!
//! Drives a real browser through declared journeys and turns what happened
//! into a launch verdict.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  RealityRunner                                               │
//! │    ├── SiteProbe          landing page -> CrawlSummary       │
//! │    ├── ParallelExecutor   N attempts in flight, fail-fast    │
//! │    │     └── AttemptEngine  steps, waits, retries, outcome   │
//! │    │           └── discovery  fallback selector chain        │
//! │    ├── BrowserPool        one browser, disposable contexts   │
//! │    ├── signals -> RuleSet -> Decision                        │
//! │    ├── scoring            market impact of failures          │
//! │    └── drift              comparison with the site baseline  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  PatternAnalyzer          recurring issues across snapshots  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod attempt;
pub mod config;
pub mod discovery;
pub mod drift;
pub mod driver;
pub mod error;
pub mod executor;
pub mod patterns;
pub mod playwright;
pub mod pool;
pub mod presets;
pub mod probe;
pub mod rules;
pub mod runner;
pub mod scoring;
pub mod signals;
pub mod spec;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use attempt::{AttemptEngine, AttemptSettings};
pub use config::{EngineConfig, RunPolicy, RunSettings};
pub use driver::BrowserDriver;
pub use error::{EngineError, EngineResult};
pub use executor::ParallelExecutor;
pub use patterns::{Pattern, PatternAnalyzer, PatternPolicy};
pub use playwright::{PlaywrightBrowser, PlaywrightConfig};
pub use pool::{BrowserPool, PageSession};
pub use rules::RuleSet;
pub use runner::{RealityRunner, RunReport, RunRequest};
pub use spec::AttemptDefinition;

/// Engine version recorded in snapshots
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
