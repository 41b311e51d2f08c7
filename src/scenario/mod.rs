//! Operation sequences: the ordered, data-dependent calls run per work item.
//!
//! A [`Step`] is one call. Steps see the responses of the steps before them
//! through [`PriorResults`]. Scenarios describe HTTP steps in TOML:
//!
//! ```toml
//! [scenario]
//! name = "user-transactions"
//!
//! [[step]]
//! name = "01_Create_User"
//! method = "POST"
//! path = "/api/users"
//! expect = [200, 201]
//! body = { user_id = "{key}", email = "{key_lower}@example.com" }
//! ```

pub mod http;
pub mod template;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::WorkItem;

pub use http::{HttpStep, HttpTarget};

/// Why a step did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Response status, or `None` when no response arrived.
    pub status: Option<u16>,
    pub reason: String,
}

impl StepFailure {
    pub fn status(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            reason: reason.into(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Responses of the steps already run for the current item, by step name.
#[derive(Debug, Clone, Default)]
pub struct PriorResults {
    results: HashMap<String, Value>,
}

impl PriorResults {
    pub fn insert(&mut self, stage: impl Into<String>, body: Value) {
        self.results.insert(stage.into(), body);
    }

    pub fn get(&self, stage: &str) -> Option<&Value> {
        self.results.get(stage)
    }
}

/// One call in an operation sequence.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// A failing critical step aborts the rest of the item's sequence.
    fn critical(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        item: &WorkItem,
        prior: &PriorResults,
    ) -> std::result::Result<Value, StepFailure>;

    /// Value worth keeping from a successful response.
    fn capture(&self, _response: &Value) -> Option<Value> {
        None
    }
}

/// An ordered list of steps shared by every worker.
#[derive(Clone, Default)]
pub struct OperationSequence {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl OperationSequence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn push(&mut self, step: Arc<dyn Step>) {
        self.steps.push(step);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for OperationSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("OperationSequence")
            .field("name", &self.name)
            .field("steps", &names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Scenario files
// ---------------------------------------------------------------------------

const USER_TRANSACTIONS: &str = include_str!("../../scenarios/user_transactions.toml");
const BULK_CREATE: &str = include_str!("../../scenarios/bulk_create.toml");

/// Top-level TOML wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub scenario: ScenarioMeta,
    #[serde(rename = "step", default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Descriptor of one HTTP call.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub method: String,
    /// Path template appended to the base URL. Empty targets the base URL.
    #[serde(default)]
    pub path: String,
    /// JSON body template. Omitted for bodiless requests.
    #[serde(default)]
    pub body: Option<Value>,
    /// Status codes counted as success.
    #[serde(default = "default_expect")]
    pub expect: Vec<u16>,
    #[serde(default = "default_critical")]
    pub critical: bool,
    /// JSON pointers tried in order; the first non-null hit is captured.
    #[serde(default)]
    pub capture: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn parse_builtin(name: &str, content: &str) -> Result<Scenario> {
    Scenario::from_toml(content)
        .map_err(|e| Error::Scenario(format!("built-in scenario {name} is invalid: {e}")))
}

fn default_expect() -> Vec<u16> {
    vec![200]
}

fn default_critical() -> bool {
    true
}

impl Scenario {
    pub fn from_toml(content: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Scenario(format!("cannot read scenario {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Look up an embedded scenario by name. `Ok(None)` for an unknown name;
    /// a built-in that fails to parse is an error.
    pub fn builtin(name: &str) -> Result<Option<Self>> {
        let content = match name {
            "user-transactions" => USER_TRANSACTIONS,
            "bulk-create" => BULK_CREATE,
            _ => return Ok(None),
        };
        parse_builtin(name, content).map(Some)
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["user-transactions", "bulk-create"]
    }

    fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Scenario(format!(
                "scenario {} has no steps",
                self.scenario.name
            )));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if self.steps[..i].iter().any(|s| s.name == step.name) {
                return Err(Error::Scenario(format!("duplicate step name {}", step.name)));
            }
            if step.name.contains('.') {
                return Err(Error::Scenario(format!(
                    "step name {} must not contain '.'",
                    step.name
                )));
            }
            if step.expect.is_empty() {
                return Err(Error::Scenario(format!(
                    "step {} expects no status codes",
                    step.name
                )));
            }
        }
        Ok(())
    }

    /// Build the executable sequence against `target`.
    pub fn into_sequence(self, target: &HttpTarget) -> Result<OperationSequence> {
        let mut sequence = OperationSequence::new(self.scenario.name);
        for config in self.steps {
            sequence.push(Arc::new(HttpStep::from_config(config, target.clone())?));
        }
        Ok(sequence)
    }
}
