//! Skills: markdown playbooks the agent can load progressively.
//!
//! Each skill is a single file `skills/<name>.md`. The first line is
//! treated as a one-line summary (stripped of a leading `#`); the rest is
//! the full body, only loaded into context when the skill is named in a
//! turn's active skill list. This mirrors [`super::memory::MemoryStore`]'s
//! plain-markdown-file approach — no database, just files a user can edit
//! directly.

use std::path::{Path, PathBuf};

pub struct SkillsLoader {
    dirs: Vec<PathBuf>,
}

impl SkillsLoader {
    /// `workspace` is searched first (`workspace/skills/`); `extra_dir`, if
    /// given, is searched second so a shared/global skills directory can
    /// supplement per-workspace ones without shadowing them.
    pub fn new(workspace: &Path, extra_dir: Option<&Path>) -> Self {
        let mut dirs = vec![workspace.join("skills")];
        if let Some(dir) = extra_dir {
            dirs.push(dir.to_path_buf());
        }
        Self { dirs }
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        self.dirs.iter().map(|d| d.join(format!("{name}.md"))).find(|p| p.exists())
    }

    fn read(&self, name: &str) -> Option<String> {
        let path = self.path_for(name)?;
        std::fs::read_to_string(path).ok()
    }

    fn all_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for dir in &self.dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("md") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        if !names.contains(&stem.to_string()) {
                            names.push(stem.to_string());
                        }
                    }
                }
            }
        }
        names.sort();
        names
    }

    fn summary_line(content: &str) -> String {
        content
            .lines()
            .next()
            .unwrap_or("")
            .trim_start_matches('#')
            .trim()
            .to_string()
    }

    /// Full bodies of the named skills, concatenated under a `# Skills`
    /// heading. Unknown names are silently skipped.
    pub fn load_skills_for_context(&self, skill_names: &[String]) -> String {
        let mut bodies = Vec::new();
        for name in skill_names {
            if let Some(content) = self.read(name) {
                bodies.push(format!("## {name}\n\n{content}"));
            }
        }
        if bodies.is_empty() {
            String::new()
        } else {
            format!("# Skills\n\n{}", bodies.join("\n\n"))
        }
    }

    /// A one-line-per-skill index of everything available, so the model
    /// knows what it can ask to load without paying for every skill body
    /// up front.
    pub fn build_summary(&self) -> String {
        let names = self.all_names();
        if names.is_empty() {
            return String::new();
        }
        let lines: Vec<String> = names
            .iter()
            .map(|name| {
                let summary = self
                    .read(name)
                    .map(|c| Self::summary_line(&c))
                    .unwrap_or_default();
                format!("- `{name}`: {summary}")
            })
            .collect();
        format!("# Available Skills\n\n{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("skills")).unwrap();
        fs::write(
            dir.path().join("skills/deploy.md"),
            "# Deploy a service\n\nRun `make deploy` from the repo root.",
        )
        .unwrap();
        dir
    }

    #[test]
    fn summary_lists_skill_with_first_line() {
        let dir = setup();
        let loader = SkillsLoader::new(dir.path(), None);
        let summary = loader.build_summary();
        assert!(summary.contains("`deploy`"));
        assert!(summary.contains("Deploy a service"));
    }

    #[test]
    fn load_skills_for_context_includes_full_body_for_named_skills_only() {
        let dir = setup();
        let loader = SkillsLoader::new(dir.path(), None);
        let loaded = loader.load_skills_for_context(&["deploy".to_string()]);
        assert!(loaded.contains("make deploy"));
        let none_loaded = loader.load_skills_for_context(&["nonexistent".to_string()]);
        assert!(none_loaded.is_empty());
    }
}
