use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use crate::events::{ThreadEvent, UserInput};
use crate::launch::{format_command_for_display, LaunchSpec, TurnArgs};
use crate::options::{ThreadOptions, TurnOptions};
use crate::{BackendError, EventStream};

const EVENT_CHANNEL_SIZE: usize = 64;
const STDERR_TAIL_LINES: usize = 50;

/// Runs each turn as a `codex exec --experimental-json` child process.
#[derive(Debug)]
pub struct ExecBackend {
    launch: LaunchSpec,
}

impl ExecBackend {
    pub fn new(launch: LaunchSpec) -> Self {
        Self { launch }
    }

    pub fn launch(&self) -> &LaunchSpec {
        &self.launch
    }

    /// Codex thread ids are UUIDs; anything else cannot be resumed.
    pub(crate) fn check_resumable(&self, thread_id: &str) -> Result<(), BackendError> {
        uuid::Uuid::parse_str(thread_id.trim())
            .map(|_| ())
            .map_err(|_| BackendError::InvalidThreadId {
                thread_id: thread_id.to_string(),
            })
    }

    pub(crate) async fn run(
        &self,
        options: &ThreadOptions,
        resume_thread_id: Option<&str>,
        input: &[UserInput],
        turn: &TurnOptions,
    ) -> Result<EventStream, BackendError> {
        let (prompt, images) = split_input(input);
        let schema_file = match &turn.output_schema {
            Some(schema) => Some(OutputSchemaFile::write(schema).await?),
            None => None,
        };

        let args = self.launch.exec_args(
            options,
            &TurnArgs {
                resume_thread_id,
                images: images.iter().map(|path| path.as_path()).collect(),
                output_schema_file: schema_file.as_ref().map(|file| file.path.as_path()),
            },
        );

        let mut command = Command::new(&self.launch.program);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.launch.env {
            command.env(key, value);
        }

        tracing::info!(
            program = ?self.launch.program,
            args = ?args,
            resume = resume_thread_id.is_some(),
            "spawning codex turn"
        );

        let spawn_start = Instant::now();
        let command_for_display = format_command_for_display(&self.launch.program, &args);
        let mut child = command.spawn().map_err(|err| {
            tracing::error!(
                program = ?self.launch.program,
                error = %err,
                "failed to spawn codex process"
            );
            BackendError::Spawn {
                command: command_for_display,
                error: err,
            }
        })?;
        tracing::debug!(
            pid = child.id().unwrap_or(0),
            elapsed_ms = spawn_start.elapsed().as_millis() as u64,
            "codex process spawned"
        );

        let mut stdin = child.stdin.take().ok_or(BackendError::MissingStdin)?;
        let stdout = child.stdout.take().ok_or(BackendError::MissingStdout)?;
        let stderr = child.stderr.take().ok_or(BackendError::MissingStderr)?;

        stdin
            .write_all(prompt.as_bytes())
            .await
            .map_err(BackendError::Write)?;
        stdin.shutdown().await.map_err(BackendError::Write)?;
        drop(stdin);

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = {
            let stderr_tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("codex stderr: {}", line);
                    let mut tail = stderr_tail.lock().await;
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        };

        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_SIZE);
        tokio::spawn(async move {
            // Keeps the schema file alive until the child is gone.
            let _schema_file = schema_file;
            let mut lines = BufReader::new(stdout).lines();
            let mut line_count: u64 = 0;

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        let _ = sender.send(Err(BackendError::Io(err))).await;
                        return;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                line_count += 1;

                let event = match serde_json::from_str::<ThreadEvent>(trimmed) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            line_number = line_count,
                            "codex stdout: invalid event line"
                        );
                        let _ = sender
                            .send(Err(BackendError::Parse {
                                error: err,
                                raw: truncate(trimmed, 200),
                            }))
                            .await;
                        return;
                    }
                };

                if sender.send(Ok(event)).await.is_err() {
                    tracing::debug!("turn consumer went away; stopping codex process");
                    return;
                }
            }

            let status = child.wait().await;
            let _ = stderr_task.await;
            match status {
                Ok(status) if status.success() => {
                    tracing::debug!(
                        total_lines = line_count,
                        elapsed_ms = spawn_start.elapsed().as_millis() as u64,
                        "codex turn finished"
                    );
                }
                Ok(status) => {
                    let stderr = stderr_tail
                        .lock()
                        .await
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("\n");
                    tracing::warn!(code = status.code(), "codex process exited with failure");
                    let _ = sender
                        .send(Err(BackendError::ProcessExited {
                            code: status.code(),
                            stderr,
                        }))
                        .await;
                }
                Err(err) => {
                    let _ = sender.send(Err(BackendError::Io(err))).await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }
}

/// Joins text inputs into the stdin prompt; images become `--image` flags.
fn split_input(input: &[UserInput]) -> (String, Vec<PathBuf>) {
    let mut texts = Vec::new();
    let mut images = Vec::new();
    for entry in input {
        match entry {
            UserInput::Text { text } => texts.push(text.as_str()),
            UserInput::LocalImage { path } => images.push(path.clone()),
        }
    }
    (texts.join("\n\n"), images)
}

fn truncate(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}

struct OutputSchemaFile {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl OutputSchemaFile {
    async fn write(schema: &Value) -> Result<Self, BackendError> {
        let dir = tempfile::Builder::new()
            .prefix("codex-output-schema-")
            .tempdir()
            .map_err(BackendError::Io)?;
        let path = dir.path().join("schema.json");
        let bytes = serde_json::to_vec(schema).map_err(BackendError::Serialize)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(BackendError::Io)?;
        Ok(Self { _dir: dir, path })
    }
}
