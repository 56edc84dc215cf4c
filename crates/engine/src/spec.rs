//! Declarative attempt definitions
//!
//! An attempt is one user journey ("signup flow") written as YAML: an
//! ordered list of steps plus the conditions that prove the goal was reached.

use launchgate_common::ImpactCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{EngineError, EngineResult};

/// A journey template; never mutated at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptDefinition {
    /// Unique id for this attempt
    pub id: String,

    /// What the visitor is trying to achieve
    pub goal: String,

    /// Business category used for impact scoring
    #[serde(default)]
    pub category: Option<ImpactCategory>,

    /// Critical attempts define the goal and the baseline critical path
    #[serde(default = "default_true")]
    pub critical: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// The journey is skipped when this target is provably absent
    #[serde(default)]
    pub requires: Option<Target>,

    /// Steps to execute in order
    pub steps: Vec<Step>,

    /// Hard conditions on the final page
    #[serde(default)]
    pub success: Vec<Condition>,

    /// Soft checks; a miss is a warning, not a failure
    #[serde(default)]
    pub validators: Vec<Condition>,
}

fn default_true() -> bool {
    true
}

/// Kind of element a logical target refers to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Input,
    Button,
    Link,
    #[default]
    Any,
}

/// A logical element ("email input") resolved at runtime by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TargetRepr")]
pub struct Target {
    pub label: String,
    pub kind: TargetKind,
    /// Author-supplied selector, tried before any heuristic
    pub selector: Option<String>,
    pub test_id: Option<String>,
    /// Visible text to match; defaults to the label
    pub text: Option<String>,
    pub input_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetRepr {
    Label(String),
    Full {
        label: String,
        #[serde(default)]
        kind: TargetKind,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        test_id: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        input_type: Option<String>,
    },
}

impl From<TargetRepr> for Target {
    fn from(repr: TargetRepr) -> Self {
        match repr {
            TargetRepr::Label(label) => Target::labeled(label, TargetKind::Any),
            TargetRepr::Full {
                label,
                kind,
                selector,
                test_id,
                text,
                input_type,
            } => Target {
                label,
                kind,
                selector,
                test_id,
                text,
                input_type,
            },
        }
    }
}

impl Target {
    pub fn labeled(label: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            label: label.into(),
            kind,
            selector: None,
            test_id: None,
            text: None,
            input_type: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_input_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_type = Some(input_type.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TargetKind::Any => write!(f, "{}", self.label),
            TargetKind::Input => write!(f, "{} input", self.label),
            TargetKind::Button => write!(f, "{} button", self.label),
            TargetKind::Link => write!(f, "{} link", self.label),
        }
    }
}

/// How to interact with a resolved element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    #[default]
    Click,
    Hover,
    Check,
    Uncheck,
    /// Press Enter on the element
    Submit,
}

/// A single step in an attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a URL (relative to the run's base URL)
    Navigate {
        #[serde(default)]
        id: Option<String>,
        url: String,
    },

    /// Click, hover, or otherwise act on an element
    Interact {
        #[serde(default)]
        id: Option<String>,
        target: Target,
        #[serde(default)]
        interaction: Interaction,
    },

    /// Fill an input field
    Fill {
        #[serde(default)]
        id: Option<String>,
        target: Target,
        value: String,
    },

    /// Wait for an element to appear
    WaitFor {
        #[serde(default)]
        id: Option<String>,
        target: Target,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Assert something about the page
    Assert {
        #[serde(default)]
        id: Option<String>,
        condition: Condition,
    },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Navigate { .. } => "navigate",
            Step::Interact { .. } => "interact",
            Step::Fill { .. } => "fill",
            Step::WaitFor { .. } => "wait_for",
            Step::Assert { .. } => "assert",
        }
    }

    fn explicit_id(&self) -> Option<&str> {
        match self {
            Step::Navigate { id, .. }
            | Step::Interact { id, .. }
            | Step::Fill { id, .. }
            | Step::WaitFor { id, .. }
            | Step::Assert { id, .. } => id.as_deref(),
        }
    }

    /// Stable id used for baselines: explicit, or `<attempt>.<n>.<kind>`
    pub fn step_id(&self, attempt_id: &str, index: usize) -> String {
        match self.explicit_id() {
            Some(id) => id.to_string(),
            None => format!("{}.{}.{}", attempt_id, index + 1, self.kind()),
        }
    }

    /// Short human description for logs
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate { url, .. } => format!("navigate:{}", url),
            Step::Interact {
                target,
                interaction,
                ..
            } => format!("{:?}:{}", interaction, target).to_lowercase(),
            Step::Fill { target, .. } => format!("fill:{}", target),
            Step::WaitFor { target, .. } => format!("wait_for:{}", target),
            Step::Assert { condition, .. } => format!("assert:{}", condition),
        }
    }
}

/// Condition evaluated against the current page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    UrlContains { value: String },
    TitleContains { value: String },
    ElementVisible { target: Target },
    ElementAbsent { target: Target },
    TextPresent { text: String },
    AnyOf { conditions: Vec<Condition> },
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::UrlContains { value } => write!(f, "url contains '{}'", value),
            Condition::TitleContains { value } => write!(f, "title contains '{}'", value),
            Condition::ElementVisible { target } => write!(f, "{} visible", target),
            Condition::ElementAbsent { target } => write!(f, "{} absent", target),
            Condition::TextPresent { text } => write!(f, "text '{}' present", text),
            Condition::AnyOf { conditions } => {
                let parts: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
                write!(f, "any of [{}]", parts.join(", "))
            }
        }
    }
}

/// File contents: a single attempt or a list of attempts
#[derive(Deserialize)]
#[serde(untagged)]
enum AttemptFile {
    Many(Vec<AttemptDefinition>),
    One(AttemptDefinition),
}

impl AttemptDefinition {
    /// Parse one or more attempt definitions from YAML
    pub fn from_yaml(yaml: &str) -> EngineResult<Vec<Self>> {
        let parsed: AttemptFile = serde_yaml::from_str(yaml)?;
        let attempts = match parsed {
            AttemptFile::Many(list) => list,
            AttemptFile::One(single) => vec![single],
        };
        for attempt in &attempts {
            attempt.validate()?;
        }
        Ok(attempts)
    }

    /// Parse attempt definitions from a YAML file
    pub fn from_file(path: &Path) -> EngineResult<Vec<Self>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load all attempt definitions from a directory
    pub fn load_all(dir: &Path) -> EngineResult<Vec<Self>> {
        let mut files: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();

        let mut attempts = Vec::new();
        for path in files {
            attempts.extend(Self::from_file(&path)?);
        }
        ensure_unique_ids(&attempts)?;
        Ok(attempts)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::Validation("attempt id must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(EngineError::Validation(format!(
                "attempt '{}' has no steps",
                self.id
            )));
        }
        let mut seen = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            let step_id = step.step_id(&self.id, i);
            if !seen.insert(step_id.clone()) {
                return Err(EngineError::Validation(format!(
                    "attempt '{}' has duplicate step id '{}'",
                    self.id, step_id
                )));
            }
        }
        Ok(())
    }
}

/// Attempt ids must be unique within one run
pub fn ensure_unique_ids(attempts: &[AttemptDefinition]) -> EngineResult<()> {
    let mut seen = HashSet::new();
    for attempt in attempts {
        if !seen.insert(attempt.id.as_str()) {
            return Err(EngineError::Validation(format!(
                "duplicate attempt id '{}'",
                attempt.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signup_attempt() {
        let yaml = r#"
id: signup
goal: A visitor can create an account
category: LEAD
steps:
  - action: navigate
    url: /signup
  - action: fill
    target: { label: email, kind: input, input_type: email }
    value: probe@example.com
  - action: interact
    target: { label: create account, kind: button }
  - action: wait_for
    target: welcome
    timeout_ms: 2000
success:
  - type: url_contains
    value: /welcome
"#;
        let attempts = AttemptDefinition::from_yaml(yaml).unwrap();
        assert_eq!(attempts.len(), 1);
        let signup = &attempts[0];
        assert_eq!(signup.category, Some(ImpactCategory::Lead));
        assert!(signup.critical);
        assert!(signup.enabled);
        assert_eq!(signup.steps.len(), 4);
        assert_eq!(signup.steps[1].step_id("signup", 1), "signup.2.fill");
        match &signup.steps[3] {
            Step::WaitFor { target, timeout_ms, .. } => {
                assert_eq!(target.label, "welcome");
                assert_eq!(target.kind, TargetKind::Any);
                assert_eq!(*timeout_ms, Some(2000));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_parse_attempt_list_with_explicit_step_ids() {
        let yaml = r#"
- id: landing
  goal: Landing page renders
  steps:
    - action: navigate
      id: open-home
      url: /
- id: contact
  goal: Contact form submits
  critical: false
  steps:
    - action: navigate
      url: /contact
"#;
        let attempts = AttemptDefinition::from_yaml(yaml).unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].steps[0].step_id("landing", 0), "open-home");
        assert!(!attempts[1].critical);
    }

    #[test]
    fn test_rejects_attempt_without_steps() {
        let yaml = "id: empty\ngoal: nothing\nsteps: []\n";
        assert!(matches!(
            AttemptDefinition::from_yaml(yaml),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_step_action() {
        let yaml = r#"
id: odd
goal: odd
steps:
  - action: teleport
    url: /
"#;
        assert!(AttemptDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_duplicate_attempt_ids_rejected() {
        let yaml = r#"
- id: a
  goal: one
  steps: [{ action: navigate, url: / }]
- id: a
  goal: two
  steps: [{ action: navigate, url: / }]
"#;
        let attempts = AttemptDefinition::from_yaml(yaml).unwrap();
        assert!(ensure_unique_ids(&attempts).is_err());
    }
}
