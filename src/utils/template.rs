//! String template rendering utilities.

pub struct TemplateVars;

impl TemplateVars {
    pub const REGISTRY_HOST: &'static str = "registryHost";
    pub const IMAGE_PATH: &'static str = "imagePath";
    pub const INDENT: &'static str = "indent";
    pub const STEP_INDENT: &'static str = "stepIndent";
    pub const SECRET_NAME: &'static str = "secretName";
    pub const REPO_FLAG: &'static str = "repoFlag";
}

pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}
