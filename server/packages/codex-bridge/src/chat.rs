use std::io;
use std::path::{Path, PathBuf};

use codex_bridge_backend::{Agent, BackendError, LaunchSpec, Thread, ThreadOptions, TurnOptions, UserInput};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ThreadDefaults;
use crate::models::{resolve_model, ModelDefaults};
use crate::response::extract_content;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub models: ModelDefaults,
    pub threads: ThreadDefaults,
    pub state_file: PathBuf,
    pub codex_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("terminal error: {0}")]
    Readline(#[from] ReadlineError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatState {
    thread_id: Option<String>,
}

/// One line of user input, interpreted.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatCommand<'a> {
    Empty,
    Exit,
    Reset,
    Message(&'a str),
}

pub fn parse_command(line: &str) -> ChatCommand<'_> {
    match line.trim() {
        "" => ChatCommand::Empty,
        "/exit" => ChatCommand::Exit,
        "/reset" => ChatCommand::Reset,
        message => ChatCommand::Message(message),
    }
}

/// A conversation whose thread id survives restarts through a state file.
pub struct ChatSession {
    agent: Agent,
    options: ThreadOptions,
    state_file: PathBuf,
    thread: Thread,
    thread_id: Option<String>,
}

impl ChatSession {
    /// Resumes the remembered thread, or starts a new one.
    pub async fn open(agent: Agent, options: ThreadOptions, state_file: PathBuf) -> Self {
        let remembered = load_thread_id(&state_file).await;
        let (thread, thread_id) = match remembered {
            Some(thread_id) => match agent.resume_thread(&thread_id, options.clone()) {
                Ok(thread) => (thread, Some(thread_id)),
                Err(err) => {
                    tracing::warn!(thread_id, error = %err, "failed to resume thread, starting a new one");
                    (agent.start_thread(options.clone()), None)
                }
            },
            None => (agent.start_thread(options.clone()), None),
        };
        Self {
            agent,
            options,
            state_file,
            thread,
            thread_id,
        }
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Runs one turn and returns the agent's reply.
    pub async fn send(&mut self, message: &str) -> Result<String, BackendError> {
        let input = vec![UserInput::Text {
            text: message.to_string(),
        }];
        let turn = self.thread.run(input, TurnOptions::default()).await?;
        self.remember_thread_id().await;
        Ok(extract_content(&turn))
    }

    /// Forgets the current thread and starts a fresh one.
    pub async fn reset(&mut self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.state_file).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        self.thread_id = None;
        self.thread = self.agent.start_thread(self.options.clone());
        Ok(())
    }

    async fn remember_thread_id(&mut self) {
        let Some(thread_id) = self.thread.id() else {
            return;
        };
        if self.thread_id.as_deref() == Some(thread_id.as_str()) {
            return;
        }
        if let Err(err) = save_thread_id(&self.state_file, &thread_id).await {
            tracing::error!(path = %self.state_file.display(), error = %err, "failed to save thread id");
        }
        println!("Thread id: {thread_id}");
        self.thread_id = Some(thread_id);
    }
}

async fn load_thread_id(path: &Path) -> Option<String> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    let state: ChatState = serde_json::from_str(&raw).ok()?;
    state.thread_id.filter(|id| !id.trim().is_empty())
}

async fn save_thread_id(path: &Path, thread_id: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let state = ChatState {
        thread_id: Some(thread_id.to_string()),
    };
    let payload = serde_json::to_string_pretty(&state).map_err(io::Error::other)?;
    tokio::fs::write(path, payload).await
}

/// Interactive loop on the terminal. Returns on `/exit`, EOF or Ctrl-C.
pub fn run_repl(config: ChatConfig, runtime: &tokio::runtime::Runtime) -> Result<(), ChatError> {
    let resolved = resolve_model(
        &config.models,
        Some(&config.models.model),
        Some(config.models.reasoning.as_str()),
    );
    let options = config.threads.thread_options(&resolved);
    let agent = Agent::exec(LaunchSpec::codex(config.codex_path.clone()));

    println!("Model: {}, reasoning: {}", resolved.model, resolved.reasoning);
    let mut session = runtime.block_on(ChatSession::open(agent, options, config.state_file));
    match session.thread_id() {
        Some(thread_id) => println!("Resumed thread {thread_id}"),
        None => println!("Started a new thread; its id is saved after the first reply."),
    }
    println!("Type /reset to start over, /exit to quit.");

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };

        match parse_command(&line) {
            ChatCommand::Empty => continue,
            ChatCommand::Exit => break,
            ChatCommand::Reset => {
                runtime.block_on(session.reset())?;
                println!("Reset. A new thread id is saved after the next reply.");
            }
            ChatCommand::Message(message) => {
                let _ = editor.add_history_entry(message);
                println!("Codex is working...");
                match runtime.block_on(session.send(message)) {
                    Ok(reply) => println!("\ncodex>\n{reply}\n"),
                    Err(err) => eprintln!("Turn failed: {err}"),
                }
            }
        }
    }

    println!("Bye.");
    Ok(())
}
