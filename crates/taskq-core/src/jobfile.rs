//! TOML job files.
//!
//! A job file is a list of `[[task]]` tables, each naming one external
//! program invocation:
//!
//! ```toml
//! [[task]]
//! program = "cc"
//! args = ["-c", "a.c", "-o", "a.o"]
//! env = { PATH = "/usr/bin" }
//! label = "compile a.c"
//! ```
//!
//! Tasks run in file order (subject to the concurrency limit).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Parsed job file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    #[serde(default, rename = "task")]
    pub tasks: Vec<JobSpec>,
}

/// One `[[task]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    /// Executable path or name. Resolution is left to the OS.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Replacement environment. When absent the task inherits ours.
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    /// Human-readable name shown in progress output.
    #[serde(default)]
    pub label: Option<String>,
}

impl JobSpec {
    /// Label to display for this task: the explicit label, or the command line.
    pub fn display_label(&self) -> String {
        self.label.clone().unwrap_or_else(|| {
            if self.args.is_empty() {
                self.program.clone()
            } else {
                format!("{} {}", self.program, self.args.join(" "))
            }
        })
    }
}

impl JobFile {
    /// Parse and validate a job file from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content)?;
        for (index, task) in file.tasks.iter().enumerate() {
            if task.program.trim().is_empty() {
                return Err(Error::JobFile(format!(
                    "task #{} has an empty program",
                    index + 1
                )));
            }
        }
        Ok(file)
    }

    /// Read and parse a job file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::JobFile(format!("Failed to read job file {}: {}", path.display(), e))
        })?;
        let file = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), tasks = file.tasks.len(), "Loaded job file");
        Ok(file)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_tasks_in_order() {
        let file = JobFile::parse(
            r#"
            [[task]]
            program = "cc"
            args = ["-c", "a.c"]

            [[task]]
            program = "cc"
            args = ["-c", "b.c"]
            label = "compile b"
            env = { PATH = "/usr/bin" }
            "#,
        )
        .unwrap();

        assert_eq!(file.tasks.len(), 2);
        assert_eq!(file.tasks[0].args, vec!["-c", "a.c"]);
        assert!(file.tasks[0].env.is_none());
        assert_eq!(
            file.tasks[1].env.as_ref().unwrap().get("PATH").map(String::as_str),
            Some("/usr/bin")
        );
    }

    #[test]
    fn empty_file_has_no_tasks() {
        let file = JobFile::parse("").unwrap();
        assert!(file.tasks.is_empty());
    }

    #[test]
    fn rejects_empty_program() {
        let err = JobFile::parse("[[task]]\nprogram = \"  \"\n").unwrap_err();
        assert!(matches!(err, Error::JobFile(_)));
        assert!(err.to_string().contains("task #1"), "got: {err}");
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = JobFile::parse("[[task]]\nprogram = \"cc\"\ncwd = \"/tmp\"\n").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn display_label_falls_back_to_command_line() {
        let spec = JobSpec {
            program: "cc".to_string(),
            args: vec!["-c".to_string(), "a.c".to_string()],
            env: None,
            label: None,
        };
        assert_eq!(spec.display_label(), "cc -c a.c");

        let labelled = JobSpec {
            label: Some("compile".to_string()),
            ..spec
        };
        assert_eq!(labelled.display_label(), "compile");
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = JobFile::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read job file"));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("jobs.toml");
        std::fs::write(&path, "[[task]]\nprogram = \"true\"\n").unwrap();
        let file = JobFile::load(&path).unwrap();
        assert_eq!(file.tasks[0].program, "true");
    }
}
