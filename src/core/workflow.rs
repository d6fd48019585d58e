use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::io;
use crate::state::{GithubStateUpdate, InfrastructureState, Phase, SecretsState, StateStore};
use crate::step::StepOutcome;
use crate::template::{render, TemplateVars};

pub const STEP_GENERATE: &str = "workflow.generate";

const IMAGE_REF: &str =
    "{{registryHost}}/$PROJECT_ID/$ARTIFACT_REGISTRY/$SERVICE_NAME:${{ github.sha }}";

/// Artifact Registry Docker host for a region.
pub fn registry_host(region: &str) -> String {
    format!("{}-docker.pkg.dev", region)
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    pub workflow_path: PathBuf,
    pub workflow_name: String,
    pub service_name: String,
    pub default_region: String,
    pub branches: Vec<String>,
    pub container_port: u16,
}

impl From<&Defaults> for WorkflowSettings {
    fn from(defaults: &Defaults) -> Self {
        Self {
            workflow_path: PathBuf::from(&defaults.workflow_path),
            workflow_name: defaults.workflow_name.clone(),
            service_name: defaults.service_name.clone(),
            default_region: defaults.default_region.clone(),
            branches: defaults.branches.clone(),
            container_port: defaults.container_port,
        }
    }
}

// ============================================================================
// Document model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowDocument {
    pub name: String,
    pub branches: Vec<String>,
    pub env: Vec<(String, String)>,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub runs_on: String,
    pub permissions: Vec<(String, String)>,
    pub steps: Vec<Step>,
}

/// One workflow step. `with` values and `run` lines are emitted verbatim,
/// they may hold `${{ }}` expressions.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Step {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub with: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<String>,
}

impl Step {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn uses(mut self, action: &str) -> Self {
        self.uses = Some(action.to_string());
        self
    }

    fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    fn with(mut self, key: &str, value: &str) -> Self {
        self.with.push((key.to_string(), value.to_string()));
        self
    }

    fn run(mut self, line: impl Into<String>) -> Self {
        self.run.push(line.into());
        self
    }
}

impl WorkflowDocument {
    /// Build-and-deploy workflow for one Cloud Run service. Authentication
    /// goes through Workload Identity, so the only secrets referenced are
    /// the provider and the service account.
    pub fn for_deployment(
        infra: &InfrastructureState,
        secrets: &SecretsState,
        settings: &WorkflowSettings,
    ) -> Self {
        let region = match infra.region.trim() {
            "" => settings.default_region.as_str(),
            region => region,
        };

        let mut env = vec![
            ("PROJECT_ID".to_string(), infra.project_id.clone()),
            ("REGION".to_string(), region.to_string()),
            ("SERVICE_NAME".to_string(), settings.service_name.clone()),
            ("ARTIFACT_REGISTRY".to_string(), infra.artifact_registry.clone()),
        ];
        for (key, value) in &secrets.env_vars {
            if !env.iter().any(|(existing, _)| existing == key) {
                env.push((key.clone(), value.clone()));
            }
        }

        let image = render(IMAGE_REF, &[(TemplateVars::REGISTRY_HOST, "$REGION-docker.pkg.dev")]);

        let steps = vec![
            Step::named("Checkout code").uses("actions/checkout@v4"),
            Step::named("Google Auth")
                .id("auth")
                .uses("google-github-actions/auth@v2")
                .with(
                    "workload_identity_provider",
                    "${{ secrets.WORKLOAD_IDENTITY_PROVIDER }}",
                )
                .with("service_account", "${{ secrets.GCP_SERVICE_ACCOUNT }}"),
            Step::named("Set up Cloud SDK").uses("google-github-actions/setup-gcloud@v2"),
            Step::named("Configure Docker")
                .run("gcloud auth configure-docker $REGION-docker.pkg.dev --quiet"),
            Step::named("Build and push image")
                .run(format!("docker build -t {} .", image))
                .run(format!("docker push {}", image)),
            Step::named("Deploy to Cloud Run")
                .run("gcloud run deploy $SERVICE_NAME \\")
                .run(format!("  --image {} \\", image))
                .run("  --region $REGION \\")
                .run("  --platform managed \\")
                .run("  --allow-unauthenticated \\")
                .run(format!("  --port {}", settings.container_port)),
        ];

        Self {
            name: settings.workflow_name.clone(),
            branches: settings.branches.clone(),
            env,
            jobs: vec![Job {
                id: "deploy".to_string(),
                runs_on: "ubuntu-latest".to_string(),
                permissions: vec![
                    ("contents".to_string(), "read".to_string()),
                    ("id-token".to_string(), "write".to_string()),
                ],
                steps,
            }],
        }
    }

    /// Render as workflow YAML. Output depends only on the document, so
    /// equal documents render byte-identical text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let branches = self
            .branches
            .iter()
            .map(|b| scalar(b))
            .collect::<Vec<_>>()
            .join(", ");

        let _ = writeln!(out, "name: {}", scalar(&self.name));
        out.push('\n');
        out.push_str("on:\n");
        for trigger in ["push", "pull_request"] {
            let _ = writeln!(out, "  {}:", trigger);
            let _ = writeln!(out, "    branches: [ {} ]", branches);
        }

        out.push_str("\nenv:\n");
        for (key, value) in &self.env {
            let _ = writeln!(out, "  {}: {}", key, scalar(value));
        }

        out.push_str("\njobs:\n");
        for (index, job) in self.jobs.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            render_job(&mut out, job);
        }

        out
    }
}

fn render_job(out: &mut String, job: &Job) {
    let _ = writeln!(out, "  {}:", job.id);
    let _ = writeln!(out, "    runs-on: {}", job.runs_on);

    if !job.permissions.is_empty() {
        out.push_str("\n    permissions:\n");
        for (scope, access) in &job.permissions {
            let _ = writeln!(out, "      {}: {}", scope, access);
        }
    }

    out.push_str("\n    steps:\n");
    for (index, step) in job.steps.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "    - name: {}", scalar(&step.name));
        if let Some(id) = &step.id {
            let _ = writeln!(out, "      id: {}", id);
        }
        if let Some(uses) = &step.uses {
            let _ = writeln!(out, "      uses: {}", uses);
        }
        if !step.with.is_empty() {
            out.push_str("      with:\n");
            for (key, value) in &step.with {
                let _ = writeln!(out, "        {}: {}", key, value);
            }
        }
        match step.run.as_slice() {
            [] => {}
            [line] => {
                let _ = writeln!(out, "      run: {}", line);
            }
            lines => {
                out.push_str("      run: |\n");
                for line in lines {
                    let _ = writeln!(out, "        {}", line);
                }
            }
        }
    }
}

/// Plain scalar when YAML would read it back as the same string,
/// double-quoted otherwise.
fn scalar(value: &str) -> String {
    const RESERVED: &[&str] = &[
        "true", "false", "yes", "no", "on", "off", "null", "~", "y", "n",
    ];

    let needs_quotes = value.is_empty()
        || value != value.trim()
        || RESERVED.contains(&value.to_ascii_lowercase().as_str())
        || value.parse::<f64>().is_ok()
        || value.starts_with(|c: char| "-?:,[]{}#&*!|>'\"%@`".contains(c))
        || value.contains(": ")
        || value.ends_with(':')
        || value.contains(" #")
        || value.ends_with('#')
        || value.contains(|c: char| matches!(c, ',' | '[' | ']' | '{' | '}' | '\n'));

    if needs_quotes {
        serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
    } else {
        value.to_string()
    }
}

/// Parse rendered text back as YAML. Anything the renderer produced that a
/// YAML reader rejects never reaches disk.
pub fn validate_yaml(text: &str) -> Result<serde_yml::Value> {
    serde_yml::from_str(text).map_err(|e| {
        Error::validation_invalid_argument(
            "workflow",
            format!("Rendered workflow is not valid YAML: {}", e),
            None,
            None,
        )
    })
}

// ============================================================================
// Generator
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedWorkflow {
    pub path: String,
    pub sha256: String,
    pub bytes: usize,
}

pub struct PipelineGenerator<'a> {
    store: &'a dyn StateStore,
    settings: WorkflowSettings,
}

impl<'a> PipelineGenerator<'a> {
    pub fn new(store: &'a dyn StateStore, settings: WorkflowSettings) -> Self {
        Self { store, settings }
    }

    pub fn workflow_path(&self) -> &Path {
        &self.settings.workflow_path
    }

    /// Render the workflow for the current state without writing anything.
    pub fn render_cicd_yaml(&self) -> Result<String> {
        let snapshot = self.store.snapshot()?;

        if !snapshot.infrastructure.setup_complete {
            return Err(Error::precondition_failed(
                Phase::GithubSetup.as_str(),
                "completed infrastructure setup",
            ));
        }
        if !snapshot.secrets.secrets_extracted {
            return Err(Error::precondition_failed(
                Phase::GithubSetup.as_str(),
                "extracted secrets",
            ));
        }

        let text = WorkflowDocument::for_deployment(
            &snapshot.infrastructure,
            &snapshot.secrets,
            &self.settings,
        )
        .render();
        validate_yaml(&text)?;

        Ok(text)
    }

    /// Write the workflow file and mark the GitHub phase complete. An
    /// existing file at the target path is replaced.
    pub fn generate_cicd_yaml(&self) -> StepOutcome {
        crate::log_status!("workflow", "Generating CI/CD workflow");

        match self.try_generate() {
            Ok(generated) => {
                crate::log_status!("workflow", "Wrote {}", generated.path);
                StepOutcome::succeeded(
                    STEP_GENERATE,
                    format!("Generated workflow at {}", generated.path),
                )
                .with_details(json!(generated))
            }
            Err(err) => {
                crate::log_status!("workflow", "Workflow generation failed: {}", err.describe());
                StepOutcome::from_error(STEP_GENERATE, &err)
            }
        }
    }

    fn try_generate(&self) -> Result<GeneratedWorkflow> {
        let text = self.render_cicd_yaml()?;
        let path = &self.settings.workflow_path;

        io::ensure_parent_dir(path, "write workflow")?;
        io::write_file_atomic(path, &text, "write workflow")?;

        self.store.update(&mut |snapshot| {
            GithubStateUpdate {
                yaml_generated: Some(true),
                setup_complete: Some(true),
                ..Default::default()
            }
            .apply(&mut snapshot.github);
            snapshot.current_phase = Phase::Pipeline;
        })?;

        Ok(GeneratedWorkflow {
            path: path.display().to_string(),
            sha256: format!("{:x}", Sha256::digest(text.as_bytes())),
            bytes: text.len(),
        })
    }
}
