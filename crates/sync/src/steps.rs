//! The fixed set of directories mirrored into the object store.

use serde::Serialize;

use gatewarden_core::config::SyncConfig;

/// One directory ↔ store-prefix mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStep {
    pub name: &'static str,
    pub source_path: String,
    pub store_prefix: String,
    /// Subdirectories (relative to `source_path`) handled by another step.
    pub excluded_subdirs: Vec<String>,
}

impl SyncStep {
    /// Absolute sandbox path for a path relative to this step's root.
    pub fn local_path(&self, relative: &str) -> String {
        join_path(&self.source_path, relative)
    }

    /// Store key for a path relative to this step's root.
    pub fn store_key(&self, relative: &str) -> String {
        format!("{}{}", self.store_prefix, relative.trim_start_matches('/'))
    }

    /// Relative path for a store key under this step's prefix.
    pub fn relative_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.store_prefix.as_str())
    }
}

/// The config, workspace and skills steps.
///
/// `config_source` is the directory the config step reads from: the current
/// config directory, or the legacy one when only that exists.
pub fn sync_steps(config: &SyncConfig, config_source: &str) -> Vec<SyncStep> {
    let workspace = config.workspace_dir.trim_end_matches('/');
    let skills = config.skills_dir.trim_end_matches('/');

    // skills live inside the workspace but sync on their own
    let nested_skills = skills
        .strip_prefix(workspace)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(|rest| vec![rest.to_string()])
        .unwrap_or_default();

    vec![
        SyncStep {
            name: "config",
            source_path: config_source.trim_end_matches('/').to_string(),
            store_prefix: normalize_prefix(&config.config_prefix),
            excluded_subdirs: Vec::new(),
        },
        SyncStep {
            name: "workspace",
            source_path: workspace.to_string(),
            store_prefix: normalize_prefix(&config.workspace_prefix),
            excluded_subdirs: nested_skills,
        },
        SyncStep {
            name: "skills",
            source_path: skills.to_string(),
            store_prefix: normalize_prefix(&config.skills_prefix),
            excluded_subdirs: Vec::new(),
        },
    ]
}

/// Steps used to restore: the config step always targets the current config directory.
pub fn restore_steps(config: &SyncConfig) -> Vec<SyncStep> {
    sync_steps(config, &config.config_dir)
}

/// Find the step owning `key` and the key's path relative to it.
pub fn step_for_key<'a, 'k>(steps: &'a [SyncStep], key: &'k str) -> Option<(&'a SyncStep, &'k str)> {
    steps
        .iter()
        .filter_map(|step| step.relative_key(key).map(|rel| (step, rel)))
        .find(|(_, rel)| !rel.is_empty())
}

pub(crate) fn join_path(dir: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

pub(crate) fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
