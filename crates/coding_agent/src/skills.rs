//! User-provided tools discovered from `skill.json` manifests.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::executor::{run_foreground, CommandOutput, ExecError};

pub const MANIFEST_FILE: &str = "skill.json";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SkillManifest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_parameters")]
    parameters: Value,
    command: String,
}

fn default_parameters() -> Value {
    json!({"type": "object", "properties": {}})
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub command: String,
    /// Directory holding the manifest; relative commands resolve against it.
    pub dir: PathBuf,
}

/// Loads `<root>/*/skill.json` from each root in order. The first skill with a given name wins.
#[must_use]
pub fn load_skills(roots: &[PathBuf]) -> Vec<Skill> {
    let mut skills: Vec<Skill> = Vec::new();
    for root in roots {
        let Ok(entries) = fs::read_dir(root) else {
            continue;
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.join(MANIFEST_FILE).is_file())
            .collect();
        dirs.sort();

        for dir in dirs {
            match load_skill(&dir) {
                Ok(skill) if skills.iter().any(|known| known.name == skill.name) => {
                    warn!(skill = %skill.name, dir = %dir.display(), "duplicate skill ignored");
                }
                Ok(skill) => skills.push(skill),
                Err(reason) => warn!(dir = %dir.display(), %reason, "invalid skill manifest"),
            }
        }
    }
    skills
}

fn load_skill(dir: &Path) -> Result<Skill, String> {
    let path = dir.join(MANIFEST_FILE);
    let raw = fs::read_to_string(&path).map_err(|error| error.to_string())?;
    let manifest: SkillManifest = serde_json::from_str(&raw).map_err(|error| error.to_string())?;
    if manifest.name.trim().is_empty() {
        return Err("skill name is empty".to_string());
    }
    if manifest.command.trim().is_empty() {
        return Err("skill command is empty".to_string());
    }

    Ok(Skill {
        name: manifest.name.trim().to_string(),
        description: manifest.description,
        parameters: manifest.parameters,
        command: manifest.command,
        dir: dir.to_path_buf(),
    })
}

/// Runs the skill in `workspace` with `SKILL_ARGS` and `SKILL_DIR` set.
pub fn run_skill(
    skill: &Skill,
    arguments: &str,
    workspace: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ExecError> {
    let command = resolve_command(skill);
    let dir = skill.dir.to_string_lossy();
    run_foreground(
        &command,
        workspace,
        timeout,
        &[("SKILL_ARGS", arguments), ("SKILL_DIR", dir.as_ref())],
    )
}

fn resolve_command(skill: &Skill) -> String {
    let command = skill.command.trim();
    let local = skill.dir.join(command);
    if !local.is_file() {
        return command.to_string();
    }

    let quoted = shell_quote(&local.to_string_lossy());
    if local.extension().and_then(|ext| ext.to_str()) == Some("sh") {
        format!("sh {quoted}")
    } else {
        quoted
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{load_skills, resolve_command, shell_quote};

    fn write_skill(root: &std::path::Path, dir: &str, manifest: &str) {
        let dir = root.join(dir);
        fs::create_dir_all(&dir).expect("create skill dir");
        fs::write(dir.join("skill.json"), manifest).expect("write manifest");
    }

    #[test]
    fn first_root_wins_and_invalid_manifests_are_skipped() {
        let user = tempfile::tempdir().expect("user root");
        let workspace = tempfile::tempdir().expect("workspace root");
        write_skill(
            user.path(),
            "lint",
            r#"{"name": "lint", "description": "user lint", "command": "run.sh"}"#,
        );
        write_skill(user.path(), "broken", r#"{"name": "broken"}"#);
        write_skill(
            workspace.path(),
            "lint",
            r#"{"name": "lint", "description": "workspace lint", "command": "run.sh"}"#,
        );
        write_skill(
            workspace.path(),
            "fmt",
            r#"{"name": "fmt", "command": "cargo fmt"}"#,
        );

        let skills = load_skills(&[user.path().to_path_buf(), workspace.path().to_path_buf()]);
        let names: Vec<&str> = skills.iter().map(|skill| skill.name.as_str()).collect();
        assert_eq!(names, vec!["lint", "fmt"]);
        assert_eq!(skills[0].description, "user lint");
        assert_eq!(skills[1].parameters["type"], "object");
    }

    #[test]
    fn local_scripts_resolve_against_the_skill_dir() {
        let root = tempfile::tempdir().expect("root");
        write_skill(root.path(), "hello", r#"{"name": "hello", "command": "run.sh"}"#);
        fs::write(root.path().join("hello").join("run.sh"), "echo hi\n").expect("script");

        let skills = load_skills(&[root.path().to_path_buf()]);
        let command = resolve_command(&skills[0]);
        assert!(command.starts_with("sh '"), "{command}");
        assert!(command.ends_with("/hello/run.sh'"), "{command}");

        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
