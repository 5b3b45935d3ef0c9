//! Which files take part in a sync, and which restore late.

use serde::Serialize;

/// Why a path was left out of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Exclusion {
    /// File name ends with an excluded suffix.
    Suffix(String),
    /// File name looks like an editor or tool backup (`*.bak`, `*.bak-<stamp>`).
    Backup,
    /// A path segment names an excluded directory.
    Directory(String),
    /// The path lies under a subdirectory the step syncs separately.
    StepSubdir(String),
}

/// Exclusion and deferral rules shared by sync and restore.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    pub suffixes: Vec<String>,
    pub directories: Vec<String>,
    /// Extensions of per-agent session transcripts.
    pub transcript_extensions: Vec<String>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            suffixes: vec![
                ".lock".into(),
                ".log".into(),
                ".tmp".into(),
                ".sample".into(),
            ],
            directories: vec![
                ".git".into(),
                "node_modules".into(),
                ".npm".into(),
                "__pycache__".into(),
            ],
            transcript_extensions: vec![".jsonl".into()],
        }
    }
}

impl ExclusionPolicy {
    /// Check a `/`-separated path relative to a step root.
    pub fn check(&self, relative: &str, excluded_subdirs: &[String]) -> Option<Exclusion> {
        let relative = relative.trim_start_matches('/');

        for subdir in excluded_subdirs {
            let subdir = subdir.trim_matches('/');
            if relative == subdir || relative.starts_with(&format!("{}/", subdir)) {
                return Some(Exclusion::StepSubdir(subdir.to_string()));
            }
        }

        let segments: Vec<&str> = relative.split('/').collect();
        let (name, parents) = match segments.split_last() {
            Some((name, parents)) => (*name, parents),
            None => return None,
        };

        if let Some(dir) = parents
            .iter()
            .find(|segment| self.directories.iter().any(|d| d == *segment))
        {
            return Some(Exclusion::Directory(dir.to_string()));
        }

        if let Some(suffix) = self.suffixes.iter().find(|s| name.ends_with(s.as_str())) {
            return Some(Exclusion::Suffix(suffix.clone()));
        }

        if name.ends_with(".bak") || name.contains(".bak-") || name.contains(".bak.") {
            return Some(Exclusion::Backup);
        }

        None
    }

    pub fn is_excluded(&self, relative: &str, excluded_subdirs: &[String]) -> bool {
        self.check(relative, excluded_subdirs).is_some()
    }

    /// Session transcripts (`agents/<id>/sessions/<file>.jsonl`) restore after startup.
    pub fn is_deferred(&self, relative: &str) -> bool {
        let segments: Vec<&str> = relative.trim_start_matches('/').split('/').collect();
        if segments.len() < 4 || segments[0] != "agents" || segments[2] != "sessions" {
            return false;
        }
        let name = segments[segments.len() - 1];
        self.transcript_extensions
            .iter()
            .any(|ext| name.ends_with(ext.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skills() -> Vec<String> {
        vec!["skills".to_string()]
    }

    #[test]
    fn test_workspace_exclusions() {
        let policy = ExclusionPolicy::default();

        assert_eq!(policy.check("a.json", &skills()), None);
        assert_eq!(
            policy.check("b.lock", &skills()),
            Some(Exclusion::Suffix(".lock".into()))
        );
        assert_eq!(
            policy.check("c.log", &skills()),
            Some(Exclusion::Suffix(".log".into()))
        );
        assert_eq!(policy.check("d.bak-20240101", &skills()), Some(Exclusion::Backup));
        assert_eq!(
            policy.check("skills/x.md", &skills()),
            Some(Exclusion::StepSubdir("skills".into()))
        );
    }

    #[test]
    fn test_directory_segments() {
        let policy = ExclusionPolicy::default();

        assert_eq!(
            policy.check("repo/.git/HEAD", &[]),
            Some(Exclusion::Directory(".git".into()))
        );
        assert_eq!(
            policy.check("tools/node_modules/x/index.js", &[]),
            Some(Exclusion::Directory("node_modules".into()))
        );
        assert_eq!(
            policy.check(".git/hooks/pre-commit.sample", &[]),
            Some(Exclusion::Directory(".git".into()))
        );
        // a file merely named like a directory is kept
        assert_eq!(policy.check("notes/.gitignore", &[]), None);
        // prefix match on the step subdir needs a full segment
        assert_eq!(policy.check("skills-archive/a.md", &skills()), None);
    }

    #[test]
    fn test_backup_variants() {
        let policy = ExclusionPolicy::default();
        assert!(policy.is_excluded("openclaw.json.bak", &[]));
        assert!(policy.is_excluded("openclaw.json.bak.1", &[]));
        assert!(!policy.is_excluded("bakery.md", &[]));
    }

    #[test]
    fn test_deferred_transcripts() {
        let policy = ExclusionPolicy::default();

        assert!(policy.is_deferred("agents/main/sessions/2024-01-01.jsonl"));
        assert!(!policy.is_deferred("agents/main/sessions/index.json"));
        assert!(!policy.is_deferred("agents/main/notes/2024-01-01.jsonl"));
        assert!(!policy.is_deferred("sessions/2024-01-01.jsonl"));
    }
}
