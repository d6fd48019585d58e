//! Persisted bootstrap state.
//!
//! Every stage reads and updates named buckets through a [`StateStore`];
//! stages keep nothing of their own between invocations. The store is a
//! single-writer resource: two stages must not run concurrently against
//! the same state file, nothing here locks it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::io;
use crate::paths;

// ============================================================================
// Phases
// ============================================================================

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Authentication,
    Infrastructure,
    Secrets,
    GithubSetup,
    Pipeline,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Authentication,
        Phase::Infrastructure,
        Phase::Secrets,
        Phase::GithubSetup,
        Phase::Pipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Authentication => "authentication",
            Phase::Infrastructure => "infrastructure",
            Phase::Secrets => "secrets",
            Phase::GithubSetup => "github_setup",
            Phase::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "authentication" | "auth" => Ok(Phase::Authentication),
            "infrastructure" | "infra" => Ok(Phase::Infrastructure),
            "secrets" => Ok(Phase::Secrets),
            "github_setup" | "github" => Ok(Phase::GithubSetup),
            "pipeline" => Ok(Phase::Pipeline),
            _ => Err(Error::validation_invalid_argument(
                "phase",
                format!("Unknown phase '{}'", s),
                None,
                Some(Phase::ALL.iter().map(|p| p.as_str().to_string()).collect()),
            )),
        }
    }
}

// ============================================================================
// Buckets
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthState {
    pub gcp_authenticated: bool,
    pub github_authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcp_project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_user: Option<String>,
}

/// Output of the external provisioning process. Empty strings mean the
/// field was not provisioned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfrastructureState {
    pub project_id: String,
    pub region: String,
    pub service_account_email: String,
    pub wif_pool: String,
    pub wif_provider: String,
    pub artifact_registry: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub apis_enabled: Vec<String>,
    pub iam_configured: bool,
    pub setup_complete: bool,
}

impl InfrastructureState {
    /// Names of identifier fields that are still empty.
    pub fn missing_identifiers(&self) -> Vec<&'static str> {
        [
            ("project_id", &self.project_id),
            ("region", &self.region),
            ("service_account_email", &self.service_account_email),
            ("wif_pool", &self.wif_pool),
            ("wif_provider", &self.wif_provider),
            ("artifact_registry", &self.artifact_registry),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    /// A completed setup must have every identifier populated.
    pub fn validate(&self) -> Result<()> {
        if !self.setup_complete {
            return Ok(());
        }

        let missing = self.missing_identifiers();
        if missing.is_empty() {
            return Ok(());
        }

        Err(Error::validation_invalid_argument(
            "setup_complete",
            format!(
                "Infrastructure marked complete but identifiers are empty: {}",
                missing.join(", ")
            ),
            None,
            Some(missing.into_iter().map(String::from).collect()),
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsState {
    pub github_secrets: BTreeMap<String, String>,
    pub env_vars: BTreeMap<String, String>,
    pub secrets_extracted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubState {
    pub yaml_generated: bool,
    pub secrets_pushed: bool,
    pub setup_complete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineState {
    pub committed: bool,
    pub running: bool,
    pub status: PipelineStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorState {
    pub has_error: bool,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_phase: Option<Phase>,
}

// ============================================================================
// Partial updates
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct GithubStateUpdate {
    pub yaml_generated: Option<bool>,
    pub secrets_pushed: Option<bool>,
    pub setup_complete: Option<bool>,
}

impl GithubStateUpdate {
    pub fn apply(&self, state: &mut GithubState) {
        if let Some(v) = self.yaml_generated {
            state.yaml_generated = v;
        }
        if let Some(v) = self.secrets_pushed {
            state.secrets_pushed = v;
        }
        if let Some(v) = self.setup_complete {
            state.setup_complete = v;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthStateUpdate {
    pub gcp_authenticated: Option<bool>,
    pub github_authenticated: Option<bool>,
    pub gcp_project: Option<String>,
    pub github_user: Option<String>,
}

impl AuthStateUpdate {
    pub fn apply(&self, state: &mut AuthState) {
        if let Some(v) = self.gcp_authenticated {
            state.gcp_authenticated = v;
        }
        if let Some(v) = self.github_authenticated {
            state.github_authenticated = v;
        }
        if let Some(v) = &self.gcp_project {
            state.gcp_project = Some(v.clone());
        }
        if let Some(v) = &self.github_user {
            state.github_user = Some(v.clone());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineStateUpdate {
    pub committed: Option<bool>,
    pub running: Option<bool>,
    pub status: Option<PipelineStatus>,
}

impl PipelineStateUpdate {
    pub fn apply(&self, state: &mut PipelineState) {
        if let Some(v) = self.committed {
            state.committed = v;
        }
        if let Some(v) = self.running {
            state.running = v;
        }
        if let Some(v) = self.status {
            state.status = v;
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Complete,
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub can_proceed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub progress_percentage: f64,
    pub current_phase: Phase,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSnapshot {
    pub auth: AuthState,
    pub infrastructure: InfrastructureState,
    pub secrets: SecretsState,
    pub github: GithubState,
    pub pipeline: PipelineState,
    pub current_phase: Phase,
    pub error: ErrorState,
}

impl StateSnapshot {
    pub fn is_phase_complete(&self, phase: Phase) -> bool {
        match phase {
            Phase::Authentication => self.auth.gcp_authenticated && self.auth.github_authenticated,
            Phase::Infrastructure => self.infrastructure.setup_complete,
            Phase::Secrets => self.secrets.secrets_extracted,
            Phase::GithubSetup => self.github.setup_complete,
            Phase::Pipeline => self.pipeline.status == PipelineStatus::Success,
        }
    }

    /// A phase may start once the phase before it is complete.
    pub fn can_proceed_to(&self, phase: Phase) -> bool {
        match phase {
            Phase::Authentication => true,
            Phase::Infrastructure => self.is_phase_complete(Phase::Authentication),
            Phase::Secrets => self.is_phase_complete(Phase::Infrastructure),
            Phase::GithubSetup => self.is_phase_complete(Phase::Secrets),
            Phase::Pipeline => self.is_phase_complete(Phase::GithubSetup),
        }
    }

    pub fn phase_status(&self) -> Vec<PhaseReport> {
        Phase::ALL
            .iter()
            .map(|&phase| PhaseReport {
                phase,
                status: if self.is_phase_complete(phase) {
                    PhaseStatus::Complete
                } else {
                    PhaseStatus::Pending
                },
                can_proceed: self.can_proceed_to(phase),
            })
            .collect()
    }

    pub fn progress(&self) -> ProgressReport {
        let total_steps = Phase::ALL.len();
        let completed_steps = Phase::ALL
            .iter()
            .filter(|&&phase| self.is_phase_complete(phase))
            .count();

        ProgressReport {
            total_steps,
            completed_steps,
            progress_percentage: completed_steps as f64 / total_steps as f64 * 100.0,
            current_phase: self.current_phase,
        }
    }

    /// Keep the buckets of `phase` and every phase before it, reset the rest.
    pub fn reset_to(&mut self, phase: Phase) {
        let previous = std::mem::take(self);

        self.auth = previous.auth;
        if phase >= Phase::Infrastructure {
            self.infrastructure = previous.infrastructure;
        }
        if phase >= Phase::Secrets {
            self.secrets = previous.secrets;
        }
        if phase >= Phase::GithubSetup {
            self.github = previous.github;
        }
        if phase >= Phase::Pipeline {
            self.pipeline = previous.pipeline;
        }
        self.current_phase = phase;
    }
}

// ============================================================================
// Store contract
// ============================================================================

pub trait StateStore {
    /// Latest committed snapshot.
    fn snapshot(&self) -> Result<StateSnapshot>;

    /// Replace the stored snapshot as a whole. Either everything is
    /// written or nothing is.
    fn commit(&self, snapshot: &StateSnapshot) -> Result<()>;

    fn update(&self, apply: &mut dyn FnMut(&mut StateSnapshot)) -> Result<StateSnapshot> {
        let mut snapshot = self.snapshot()?;
        apply(&mut snapshot);
        self.commit(&snapshot)?;
        Ok(snapshot)
    }

    fn get_auth_state(&self) -> Result<AuthState> {
        Ok(self.snapshot()?.auth)
    }

    fn get_infrastructure_state(&self) -> Result<InfrastructureState> {
        Ok(self.snapshot()?.infrastructure)
    }

    fn get_secrets_state(&self) -> Result<SecretsState> {
        Ok(self.snapshot()?.secrets)
    }

    fn get_github_state(&self) -> Result<GithubState> {
        Ok(self.snapshot()?.github)
    }

    fn get_pipeline_state(&self) -> Result<PipelineState> {
        Ok(self.snapshot()?.pipeline)
    }

    fn get_error(&self) -> Result<ErrorState> {
        Ok(self.snapshot()?.error)
    }

    fn update_infrastructure_state(&self, infrastructure: &InfrastructureState) -> Result<()> {
        infrastructure.validate()?;
        self.update(&mut |s| s.infrastructure = infrastructure.clone())?;
        Ok(())
    }

    fn update_secrets_state(
        &self,
        github_secrets: BTreeMap<String, String>,
        env_vars: BTreeMap<String, String>,
        secrets_extracted: bool,
    ) -> Result<()> {
        let secrets = SecretsState {
            github_secrets,
            env_vars,
            secrets_extracted,
        };
        self.update(&mut |s| s.secrets = secrets.clone())?;
        Ok(())
    }

    fn update_github_state(&self, fields: &GithubStateUpdate) -> Result<()> {
        self.update(&mut |s| fields.apply(&mut s.github))?;
        Ok(())
    }

    fn update_auth_state(&self, fields: &AuthStateUpdate) -> Result<()> {
        self.update(&mut |s| fields.apply(&mut s.auth))?;
        Ok(())
    }

    fn update_pipeline_state(&self, fields: &PipelineStateUpdate) -> Result<()> {
        self.update(&mut |s| fields.apply(&mut s.pipeline))?;
        Ok(())
    }

    fn set_current_phase(&self, phase: Phase) -> Result<()> {
        self.update(&mut |s| s.current_phase = phase)?;
        Ok(())
    }

    fn set_error(&self, message: &str, phase: Phase) -> Result<()> {
        self.update(&mut |s| {
            s.error = ErrorState {
                has_error: true,
                error_message: message.to_string(),
                error_phase: Some(phase),
            }
        })?;
        Ok(())
    }

    fn clear_error(&self) -> Result<()> {
        self.update(&mut |s| s.error = ErrorState::default())?;
        Ok(())
    }

    fn can_proceed_to_phase(&self, phase: Phase) -> Result<bool> {
        Ok(self.snapshot()?.can_proceed_to(phase))
    }

    fn phase_status(&self) -> Result<Vec<PhaseReport>> {
        Ok(self.snapshot()?.phase_status())
    }

    fn overall_progress(&self) -> Result<ProgressReport> {
        Ok(self.snapshot()?.progress())
    }

    fn reset_to_phase(&self, phase: Phase) -> Result<StateSnapshot> {
        self.update(&mut |s| s.reset_to(phase))
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Snapshot persisted as one pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/launchpad/state.json`
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(paths::state_json()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStateStore {
    fn snapshot(&self) -> Result<StateSnapshot> {
        if !self.path.exists() {
            return Ok(StateSnapshot::default());
        }

        let content = io::read_file(&self.path, "read state")?;
        serde_json::from_str(&content)
            .map_err(|e| Error::config_invalid_json(self.path.display().to_string(), e))
    }

    fn commit(&self, snapshot: &StateSnapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize state".to_string())))?;

        io::ensure_parent_dir(&self.path, "write state")?;
        io::write_file_atomic(&self.path, &content, "write state")
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: RefCell<StateSnapshot>,
    commits: Cell<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: RefCell::new(snapshot),
            commits: Cell::new(0),
        }
    }

    /// Number of successful commits since construction.
    pub fn commit_count(&self) -> usize {
        self.commits.get()
    }
}

impl StateStore for MemoryStateStore {
    fn snapshot(&self) -> Result<StateSnapshot> {
        Ok(self.snapshot.borrow().clone())
    }

    fn commit(&self, snapshot: &StateSnapshot) -> Result<()> {
        *self.snapshot.borrow_mut() = snapshot.clone();
        self.commits.set(self.commits.get() + 1);
        Ok(())
    }
}
