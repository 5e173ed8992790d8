use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::options::ThreadOptions;

const DEFAULT_PROGRAM: &str = "codex";

/// How to start the `codex` binary for one turn.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub env: HashMap<String, String>,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            env: HashMap::new(),
        }
    }
}

/// Everything that varies between two turns of the same program.
#[derive(Debug, Default)]
pub(crate) struct TurnArgs<'a> {
    pub resume_thread_id: Option<&'a str>,
    pub images: Vec<&'a Path>,
    pub output_schema_file: Option<&'a Path>,
}

impl LaunchSpec {
    pub fn codex(program: Option<PathBuf>) -> Self {
        Self {
            program: program.unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM)),
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub(crate) fn exec_args(&self, options: &ThreadOptions, turn: &TurnArgs<'_>) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--experimental-json".to_string()];

        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(sandbox) = options.sandbox_mode {
            args.push("--sandbox".to_string());
            args.push(sandbox.as_str().to_string());
        }
        if let Some(dir) = &options.working_directory {
            args.push("--cd".to_string());
            args.push(dir.to_string_lossy().to_string());
        }
        if options.skip_git_repo_check {
            args.push("--skip-git-repo-check".to_string());
        }
        if let Some(schema) = turn.output_schema_file {
            args.push("--output-schema".to_string());
            args.push(schema.to_string_lossy().to_string());
        }
        if let Some(effort) = options.reasoning_effort {
            push_config(&mut args, "model_reasoning_effort", &format!("\"{effort}\""));
        }
        if let Some(enabled) = options.network_access_enabled {
            push_config(
                &mut args,
                "sandbox_workspace_write.network_access",
                &enabled.to_string(),
            );
        }
        if let Some(enabled) = options.web_search_enabled {
            push_config(&mut args, "features.web_search_request", &enabled.to_string());
        }
        if let Some(policy) = options.approval_policy {
            push_config(&mut args, "approval_policy", &format!("\"{policy}\""));
        }
        for image in &turn.images {
            args.push("--image".to_string());
            args.push(image.to_string_lossy().to_string());
        }
        if let Some(thread_id) = turn.resume_thread_id {
            args.push("resume".to_string());
            args.push(thread_id.to_string());
        }

        args
    }
}

fn push_config(args: &mut Vec<String>, key: &str, value: &str) {
    args.push("--config".to_string());
    args.push(format!("{key}={value}"));
}

pub(crate) fn format_command_for_display(program: &Path, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(shell_quote(program.to_string_lossy().as_ref()));
    for arg in args {
        parts.push(shell_quote(arg));
    }
    parts.join(" ")
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ApprovalPolicy, ReasoningEffort, SandboxMode};

    #[test]
    fn builds_full_exec_argv() {
        let launch = LaunchSpec::codex(None);
        let options = ThreadOptions {
            model: Some("gpt-5-codex".to_string()),
            reasoning_effort: Some(ReasoningEffort::High),
            sandbox_mode: Some(SandboxMode::WorkspaceWrite),
            working_directory: Some(PathBuf::from("/srv/work")),
            skip_git_repo_check: true,
            network_access_enabled: Some(true),
            web_search_enabled: Some(false),
            approval_policy: Some(ApprovalPolicy::Never),
        };
        let image = PathBuf::from("/tmp/a.png");
        let schema = PathBuf::from("/tmp/schema.json");
        let args = launch.exec_args(
            &options,
            &TurnArgs {
                resume_thread_id: Some("thread-1"),
                images: vec![image.as_path()],
                output_schema_file: Some(schema.as_path()),
            },
        );
        assert_eq!(
            args,
            vec![
                "exec",
                "--experimental-json",
                "--model",
                "gpt-5-codex",
                "--sandbox",
                "workspace-write",
                "--cd",
                "/srv/work",
                "--skip-git-repo-check",
                "--output-schema",
                "/tmp/schema.json",
                "--config",
                "model_reasoning_effort=\"high\"",
                "--config",
                "sandbox_workspace_write.network_access=true",
                "--config",
                "features.web_search_request=false",
                "--config",
                "approval_policy=\"never\"",
                "--image",
                "/tmp/a.png",
                "resume",
                "thread-1",
            ]
        );
    }

    #[test]
    fn minimal_argv_has_no_resume() {
        let args = LaunchSpec::default().exec_args(&ThreadOptions::default(), &TurnArgs::default());
        assert_eq!(args, vec!["exec", "--experimental-json"]);
    }

    #[test]
    fn display_quotes_arguments() {
        let display = format_command_for_display(
            Path::new("codex"),
            &["exec".to_string(), "it's".to_string()],
        );
        assert_eq!(display, "'codex' 'exec' 'it'\\''s'");
    }
}
