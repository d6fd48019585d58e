//! Registry migration for workflows written against Container Registry.
//!
//! Each pass is a regex rewrite keyed on one structural pattern. Rewritten
//! text never matches its own pass again, so patching twice changes nothing
//! the second time.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::Result;
use crate::io;
use crate::template::{render, TemplateVars};
use crate::workflow::registry_host;

// A path segment: literal characters, a whole `${{ ... }}` expression or a
// shell variable.
const SEGMENT: &str = r"(?:\$\{\{[^}]*\}\}|\$\{?[A-Za-z_][A-Za-z0-9_]*\}?|[A-Za-z0-9._-])+";

fn legacy_image(prefix: &str) -> Regex {
    let pattern = format!(
        r"(?P<prefix>{})gcr\.io/(?P<project>{seg})/(?P<image>{seg}(?:/{seg})*):(?P<tag>{seg})",
        prefix,
        seg = SEGMENT
    );
    Regex::new(&pattern).unwrap()
}

static BUILD_IMAGE: LazyLock<Regex> = LazyLock::new(|| legacy_image(r"docker build\s+-t\s+"));

static PUSH_IMAGE: LazyLock<Regex> = LazyLock::new(|| legacy_image(r"docker push\s+"));

static DEPLOY_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| legacy_image(r"(?:image:[ \t]+|--image[ =])"));

static CONFIGURE_DOCKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^(?P<indent>[ \t]*)- name: Configure Docker[ \t]*\n(?P<body>[ \t]+)run: gcloud auth configure-docker[ \t]*$",
    )
    .unwrap()
});

// Only matches a run block whose first two lines are the registry build
// and push, so an already enriched step is left alone.
static BUILD_AND_PUSH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^(?P<indent>[ \t]*)- name: Build and push container[ \t]*\n(?P<body>[ \t]+)run: \|[ \t]*\n(?P<line>[ \t]+)(?P<build>docker build -t [^\s]+-docker\.pkg\.dev/[^\n]*)\n[ \t]+(?P<push>docker push [^\s]+-docker\.pkg\.dev/[^\n]*?)[ \t]*$",
    )
    .unwrap()
});

const IMAGE_REPLACEMENT: &str = "{{registryHost}}/{{imagePath}}";

const CONFIGURE_DOCKER_STEPS: &str = r#"{{indent}}- name: Configure Docker for Artifact Registry
{{stepIndent}}run: |
{{stepIndent}}  gcloud auth configure-docker {{registryHost}} --quiet
{{stepIndent}}  echo "Docker configured for Artifact Registry"

{{indent}}- name: Create Artifact Registry repository
{{stepIndent}}run: |
{{stepIndent}}  echo "Creating Artifact Registry repository..."
{{stepIndent}}  gcloud artifacts repositories create ${{ env.SERVICE_NAME }} \
{{stepIndent}}    --repository-format=docker \
{{stepIndent}}    --location=${{ env.REGION }} \
{{stepIndent}}    --description="Docker repository for ${{ env.SERVICE_NAME }}" \
{{stepIndent}}    --quiet || echo "Repository already exists"
{{stepIndent}}  echo "Artifact Registry repository ready""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchPass {
    BuildImage,
    PushImage,
    DeployImage,
    ConfigureDocker,
    BuildProgress,
}

impl PatchPass {
    pub const ALL: [PatchPass; 5] = [
        PatchPass::BuildImage,
        PatchPass::PushImage,
        PatchPass::DeployImage,
        PatchPass::ConfigureDocker,
        PatchPass::BuildProgress,
    ];
}

#[derive(Debug, Clone, Serialize)]
pub struct PassCount {
    pub pass: PatchPass,
    pub replacements: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchReport {
    pub registry_host: String,
    pub passes: Vec<PassCount>,
    pub total_replacements: usize,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub written: bool,
}

#[derive(Debug, Clone)]
pub struct WorkflowPatcher {
    host: String,
}

impl WorkflowPatcher {
    pub fn new(region: &str) -> Self {
        Self {
            host: registry_host(region),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Apply every pass in order. Returns the patched text and the report.
    pub fn patch_text(&self, content: &str) -> (String, PatchReport) {
        let mut text = content.to_string();
        let mut passes = Vec::with_capacity(PatchPass::ALL.len());

        for pass in PatchPass::ALL {
            let (next, replacements) = self.apply_pass(pass, &text);
            text = next;
            passes.push(PassCount { pass, replacements });
        }

        let total_replacements = passes.iter().map(|p| p.replacements).sum();
        let changed = text != content;

        (
            text,
            PatchReport {
                registry_host: self.host.clone(),
                passes,
                total_replacements,
                changed,
                path: None,
                written: false,
            },
        )
    }

    /// Patch a workflow file in place. The file is rewritten atomically,
    /// and only when a pass changed something.
    pub fn patch_file(&self, path: &Path) -> Result<PatchReport> {
        let content = io::read_file(path, "read workflow")?;
        let (patched, mut report) = self.patch_text(&content);

        if report.changed {
            io::write_file_atomic(path, &patched, "write patched workflow")?;
            report.written = true;
            crate::log_status!(
                "patch",
                "Rewrote {} ({} replacements)",
                path.display(),
                report.total_replacements
            );
        } else {
            crate::log_status!("patch", "{} already uses {}", path.display(), self.host);
        }

        report.path = Some(path.display().to_string());
        Ok(report)
    }

    fn apply_pass(&self, pass: PatchPass, text: &str) -> (String, usize) {
        let regex: &Regex = match pass {
            PatchPass::BuildImage => &*BUILD_IMAGE,
            PatchPass::PushImage => &*PUSH_IMAGE,
            PatchPass::DeployImage => &*DEPLOY_IMAGE,
            PatchPass::ConfigureDocker => &*CONFIGURE_DOCKER,
            PatchPass::BuildProgress => &*BUILD_AND_PUSH,
        };

        let count = regex.find_iter(text).count();
        if count == 0 {
            return (text.to_string(), 0);
        }

        let replaced = match pass {
            PatchPass::BuildImage | PatchPass::PushImage | PatchPass::DeployImage => regex
                .replace_all(text, |caps: &Captures| self.image_reference(caps))
                .into_owned(),
            PatchPass::ConfigureDocker => regex
                .replace_all(text, |caps: &Captures| self.configure_docker(caps))
                .into_owned(),
            PatchPass::BuildProgress => regex
                .replace_all(text, |caps: &Captures| build_progress(caps))
                .into_owned(),
        };

        (replaced, count)
    }

    /// `gcr.io/P/I:T` becomes `HOST/P/I/I:T`. Nested image paths keep
    /// their shape, with the repository named after the last segment:
    /// `gcr.io/P/team/app:T` becomes `HOST/P/app/team/app:T`.
    fn image_reference(&self, caps: &Captures) -> String {
        let image = &caps["image"];
        let repository = image.rsplit('/').next().unwrap_or(image);
        let image_path = format!("{}/{}/{}:{}", &caps["project"], repository, image, &caps["tag"]);
        format!(
            "{}{}",
            &caps["prefix"],
            render(
                IMAGE_REPLACEMENT,
                &[
                    (TemplateVars::REGISTRY_HOST, self.host.as_str()),
                    (TemplateVars::IMAGE_PATH, image_path.as_str()),
                ],
            )
        )
    }

    fn configure_docker(&self, caps: &Captures) -> String {
        render(
            CONFIGURE_DOCKER_STEPS,
            &[
                (TemplateVars::INDENT, &caps["indent"]),
                (TemplateVars::STEP_INDENT, &caps["body"]),
                (TemplateVars::REGISTRY_HOST, self.host.as_str()),
            ],
        )
    }
}

fn build_progress(caps: &Captures) -> String {
    let indent = &caps["indent"];
    let body = &caps["body"];
    let line = &caps["line"];

    [
        format!("{}- name: Build and push container", indent),
        format!("{}run: |", body),
        format!("{}echo \"Building and pushing Docker image...\"", line),
        format!("{}{}", line, &caps["build"]),
        format!("{}echo \"Docker image built successfully\"", line),
        format!("{}echo \"Pushing to Artifact Registry...\"", line),
        format!("{}{}", line, &caps["push"]),
        format!("{}echo \"Docker image pushed successfully\"", line),
    ]
    .join("\n")
}
