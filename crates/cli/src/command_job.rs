//! Configured `[[jobs]]` entries: external commands run as job actions.

use std::{collections::BTreeMap, path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use {
    anyhow::{Context, bail},
    serde_json::json,
    tokio::process::Command,
    tracing::{debug, warn},
};

use {
    hunter_config::JobEntry,
    hunter_scheduler::{JobDefinition, JobOutput, job::action},
};

/// Characters of stdout kept in the job output.
const STDOUT_TAIL_CHARS: usize = 1000;
/// Characters of stderr put into the failure message.
const STDERR_TAIL_CHARS: usize = 500;

/// One external command with its environment.
#[derive(Debug, Clone)]
pub struct CommandJob {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandJob {
    pub fn from_entry(entry: &JobEntry) -> anyhow::Result<Self> {
        Ok(Self {
            program: entry.command.clone(),
            args: entry.args.clone(),
            env: entry.env.clone(),
            working_dir: entry.working_dir.clone(),
            timeout: entry.timeout()?,
        })
    }

    /// Run to completion. A non-zero exit, a spawn error or a timeout is an
    /// `Err`; success yields `{exit_code, stdout_tail}`.
    pub async fn run(&self) -> anyhow::Result<JobOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(program = %self.program, args = ?self.args, "spawning job command");
        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.program))?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!(program = %self.program, "job command timed out");
                    bail!("'{}' timed out after {}s", self.program, limit.as_secs());
                },
            },
            None => child.wait_with_output().await?,
        };

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = tail_chars(stderr.trim_end(), STDERR_TAIL_CHARS);
            if tail.is_empty() {
                bail!("'{}' exited with code {exit_code}", self.program);
            }
            bail!("'{}' exited with code {exit_code}: {tail}", self.program);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Some(json!({
            "exit_code": exit_code,
            "stdout_tail": tail_chars(stdout.trim_end(), STDOUT_TAIL_CHARS),
        })))
    }
}

/// Last `max` characters of `text`.
pub fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    text.char_indices()
        .nth(skip)
        .map(|(i, _)| &text[i..])
        .unwrap_or(text)
}

/// Registry definition for a configured command job.
pub fn definition(entry: &JobEntry) -> anyhow::Result<JobDefinition> {
    let job = Arc::new(CommandJob::from_entry(entry)?);
    let run = action(move || {
        let job = Arc::clone(&job);
        async move { job.run().await }
    });
    Ok(
        JobDefinition::new(&entry.name, entry.schedule.clone(), entry.category, run)
            .with_priority(entry.priority)
            .with_description(&entry.description)
            .with_dependencies(entry.dependencies.iter().cloned())
            .with_allow_overlap(entry.allow_overlap)
            .with_enabled(entry.enabled)
            .with_metadata("command", entry.command.as_str()),
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandJob {
        CommandJob {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn success_reports_exit_code_and_stdout_tail() {
        let out = sh("echo hello").run().await.unwrap().unwrap();
        assert_eq!(out["exit_code"], 0);
        assert_eq!(out["stdout_tail"], "hello");
    }

    #[tokio::test]
    async fn failure_carries_stderr_tail() {
        let err = sh("echo boom >&2; exit 3").run().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with code 3"), "{msg}");
        assert!(msg.ends_with("boom"), "{msg}");
    }

    #[tokio::test]
    async fn env_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = sh("printf '%s:' \"$HUNTER_TEST_VAR\"; pwd");
        job.env.insert("HUNTER_TEST_VAR".into(), "set".into());
        job.working_dir = Some(dir.path().to_path_buf());
        let out = job.run().await.unwrap().unwrap();
        let stdout = out["stdout_tail"].as_str().unwrap();
        assert!(stdout.starts_with("set:"), "{stdout}");
        let file_name = dir.path().file_name().unwrap().to_str().unwrap();
        assert!(stdout.ends_with(file_name), "{stdout}");
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let mut job = sh("sleep 5");
        job.timeout = Some(Duration::from_millis(50));
        let err = job.run().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_program_is_a_failure() {
        let job = CommandJob {
            program: "/nonexistent/hunter-test-binary".into(),
            ..sh("")
        };
        assert!(job.run().await.unwrap_err().to_string().contains("failed to spawn"));
    }

    #[test]
    fn tail_keeps_last_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
        assert_eq!(tail_chars("ééé", 2), "éé");
    }
}
