use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use crate::command;
use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::state::{GithubStateUpdate, InfrastructureState, Phase, SecretsState, StateStore};
use crate::step::StepOutcome;
use crate::template::{render, TemplateVars};

pub const GCP_PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const GCP_REGION: &str = "GCP_REGION";
pub const GCP_SERVICE_ACCOUNT: &str = "GCP_SERVICE_ACCOUNT";
pub const WORKLOAD_IDENTITY_PROVIDER: &str = "WORKLOAD_IDENTITY_PROVIDER";
pub const WORKLOAD_IDENTITY_POOL: &str = "WORKLOAD_IDENTITY_POOL";
pub const WORKLOAD_IDENTITY_PROVIDER_NAME: &str = "WORKLOAD_IDENTITY_PROVIDER_NAME";
pub const ARTIFACT_REGISTRY: &str = "ARTIFACT_REGISTRY";

pub const STEP_EXTRACT: &str = "secrets.extract";
pub const STEP_PUSH: &str = "secrets.push";

const GH_SECRET_SET: &str = "gh secret set {{secretName}}{{repoFlag}}";

#[derive(Debug, Clone, PartialEq)]
pub struct SecretsSettings {
    pub service_name: String,
    pub default_region: String,
}

impl From<&Defaults> for SecretsSettings {
    fn from(defaults: &Defaults) -> Self {
        Self {
            service_name: defaults.service_name.clone(),
            default_region: defaults.default_region.clone(),
        }
    }
}

fn present(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn region_for<'a>(infra: &'a InfrastructureState, settings: &'a SecretsSettings) -> &'a str {
    present(&infra.region).unwrap_or(&settings.default_region)
}

/// Full resource path of the Workload Identity provider.
pub fn workload_identity_provider(project_id: &str, pool: &str, provider: &str) -> String {
    format!(
        "projects/{}/locations/global/workloadIdentityPools/{}/providers/{}",
        project_id, pool, provider
    )
}

/// Secrets derived from infrastructure state. Sparse: a field that was
/// not provisioned produces no key at all.
pub fn github_secrets(
    infra: &InfrastructureState,
    settings: &SecretsSettings,
) -> BTreeMap<String, String> {
    let mut secrets = BTreeMap::new();

    if let Some(project_id) = present(&infra.project_id) {
        secrets.insert(GCP_PROJECT_ID.to_string(), project_id.to_string());
        secrets.insert(
            GCP_REGION.to_string(),
            region_for(infra, settings).to_string(),
        );
    }

    if let Some(email) = present(&infra.service_account_email) {
        secrets.insert(GCP_SERVICE_ACCOUNT.to_string(), email.to_string());
    }

    if let (Some(pool), Some(provider)) = (present(&infra.wif_pool), present(&infra.wif_provider)) {
        secrets.insert(
            WORKLOAD_IDENTITY_PROVIDER.to_string(),
            workload_identity_provider(infra.project_id.trim(), pool, provider),
        );
        secrets.insert(WORKLOAD_IDENTITY_POOL.to_string(), pool.to_string());
        secrets.insert(
            WORKLOAD_IDENTITY_PROVIDER_NAME.to_string(),
            provider.to_string(),
        );
    }

    if let Some(registry) = present(&infra.artifact_registry) {
        secrets.insert(ARTIFACT_REGISTRY.to_string(), registry.to_string());
    }

    secrets
}

/// Plain environment variables for the deployment job.
pub fn env_vars(infra: &InfrastructureState, settings: &SecretsSettings) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();

    if let Some(project_id) = present(&infra.project_id) {
        vars.insert("PROJECT_ID".to_string(), project_id.to_string());
        vars.insert("REGION".to_string(), region_for(infra, settings).to_string());
        vars.insert("SERVICE_NAME".to_string(), settings.service_name.clone());
    }

    vars
}

// ============================================================================
// Push plan
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PlannedSecret {
    pub name: String,
    /// Command that sets the secret; the value is fed on stdin.
    pub command: String,
    pub value_length: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecretsPushPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub secrets: Vec<PlannedSecret>,
}

impl SecretsPushPlan {
    pub fn build(secrets: &BTreeMap<String, String>, repository: Option<&str>) -> Self {
        let repo_flag = repository
            .map(|repo| format!(" --repo {}", repo))
            .unwrap_or_default();

        let secrets = secrets
            .iter()
            .map(|(name, value)| PlannedSecret {
                name: name.clone(),
                command: render(
                    GH_SECRET_SET,
                    &[
                        (TemplateVars::SECRET_NAME, name.as_str()),
                        (TemplateVars::REPO_FLAG, repo_flag.as_str()),
                    ],
                ),
                value_length: value.len(),
            })
            .collect();

        Self {
            repository: repository.map(str::to_string),
            secrets,
        }
    }
}

/// Destination for GitHub repository secrets.
pub trait SecretSink {
    fn set_secret(&self, name: &str, value: &str) -> Result<()>;
}

/// Pushes secrets with the GitHub CLI.
pub struct GhCliSink {
    repository: Option<String>,
}

impl GhCliSink {
    pub fn new(repository: Option<String>) -> Self {
        Self { repository }
    }
}

impl SecretSink for GhCliSink {
    fn set_secret(&self, name: &str, value: &str) -> Result<()> {
        let mut args = vec!["secret", "set", name];
        if let Some(repo) = &self.repository {
            args.push("--repo");
            args.push(repo);
        }
        command::run_with_stdin("gh", &args, value, "gh secret set")?;
        Ok(())
    }
}

// ============================================================================
// Extractor
// ============================================================================

pub struct SecretsExtractor<'a> {
    store: &'a dyn StateStore,
    settings: SecretsSettings,
}

impl<'a> SecretsExtractor<'a> {
    pub fn new(store: &'a dyn StateStore, settings: SecretsSettings) -> Self {
        Self { store, settings }
    }

    /// Derive secrets and env vars from infrastructure state and record
    /// them. Commits once on success, nothing on failure; the caller
    /// decides whether to record the failure in the error bucket.
    pub fn extract_all_secrets(&self) -> StepOutcome {
        crate::log_status!("secrets", "Extracting secrets from infrastructure configuration");

        match self.try_extract() {
            Ok((secrets, vars)) => {
                crate::log_status!(
                    "secrets",
                    "Extracted {} secrets and {} environment variables",
                    secrets.len(),
                    vars.len()
                );
                StepOutcome::succeeded(
                    STEP_EXTRACT,
                    format!(
                        "Extracted {} GitHub secrets and {} environment variables",
                        secrets.len(),
                        vars.len()
                    ),
                )
                .with_details(json!({
                    "secrets": secrets.keys().collect::<Vec<_>>(),
                    "env_vars": vars,
                }))
            }
            Err(err) => {
                crate::log_status!("secrets", "Secrets extraction failed: {}", err.describe());
                StepOutcome::from_error(STEP_EXTRACT, &err)
            }
        }
    }

    fn try_extract(&self) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>)> {
        let infra = self.store.get_infrastructure_state()?;

        if !infra.setup_complete {
            return Err(Error::precondition_failed(
                Phase::Secrets.as_str(),
                "completed infrastructure setup",
            ));
        }

        let secrets = github_secrets(&infra, &self.settings);
        let vars = env_vars(&infra, &self.settings);

        let extracted = SecretsState {
            github_secrets: secrets.clone(),
            env_vars: vars.clone(),
            secrets_extracted: true,
        };
        self.store.update(&mut |snapshot| {
            snapshot.secrets = extracted.clone();
            snapshot.current_phase = Phase::GithubSetup;
        })?;

        Ok((secrets, vars))
    }

    /// Plan pushing the extracted secrets. Read-only.
    pub fn plan_secrets_push(&self, repository: Option<&str>) -> Result<SecretsPushPlan> {
        let secrets = self.store.get_secrets_state()?;

        if !secrets.secrets_extracted {
            return Err(Error::precondition_failed(
                STEP_PUSH,
                "extracted secrets (run 'launchpad secrets extract')",
            ));
        }
        if secrets.github_secrets.is_empty() {
            return Err(Error::precondition_failed(
                STEP_PUSH,
                "at least one extracted secret",
            ));
        }

        Ok(SecretsPushPlan::build(&secrets.github_secrets, repository))
    }

    /// Push every extracted secret through `sink`, then record the push.
    /// Stops at the first failed secret without touching state.
    pub fn push_secrets(&self, sink: &dyn SecretSink) -> StepOutcome {
        crate::log_status!("secrets", "Pushing secrets to GitHub");

        match self.try_push(sink) {
            Ok(names) => {
                crate::log_status!("secrets", "Pushed {} secrets", names.len());
                StepOutcome::succeeded(STEP_PUSH, format!("Pushed {} secrets to GitHub", names.len()))
                    .with_details(json!({ "secrets": names }))
            }
            Err(err) => {
                crate::log_status!("secrets", "Failed to push secrets: {}", err.describe());
                StepOutcome::from_error(STEP_PUSH, &err)
            }
        }
    }

    fn try_push(&self, sink: &dyn SecretSink) -> Result<Vec<String>> {
        let plan = self.plan_secrets_push(None)?;
        let secrets = self.store.get_secrets_state()?.github_secrets;

        let mut pushed = Vec::with_capacity(plan.secrets.len());
        for planned in &plan.secrets {
            let value = secrets.get(&planned.name).map(String::as_str).unwrap_or_default();
            sink.set_secret(&planned.name, value)?;
            pushed.push(planned.name.clone());
        }

        self.store.update_github_state(&GithubStateUpdate {
            secrets_pushed: Some(true),
            ..Default::default()
        })?;

        Ok(pushed)
    }
}
