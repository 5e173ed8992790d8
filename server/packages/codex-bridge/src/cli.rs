use std::path::PathBuf;

use clap::{ArgAction, Args, Parser};
use codex_bridge_backend::{ApprovalPolicy, ReasoningEffort, SandboxMode};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::chat::{ChatConfig, ChatError};
use crate::config::{
    default_state_file, parse_bool, parse_size, resolve_working_directory, BridgeConfig,
    ThreadDefaults, DEFAULT_HOST, DEFAULT_PORT,
};
use crate::models::ModelDefaults;

const BRIDGE_STATE_FILE: &str = "codex_threads.json";
const CHAT_STATE_FILE: &str = "codex_thread.json";

/// Backend flags shared by the bridge and the chat client.
#[derive(Args, Debug, Clone)]
pub struct CodexArgs {
    /// Default model when a request does not name one.
    #[arg(long, env = "CODEX_MODEL", default_value = "gpt-5-codex")]
    pub model: String,

    /// Default reasoning effort.
    #[arg(long, env = "CODEX_REASONING")]
    pub reasoning: Option<ReasoningEffort>,

    /// Older name for `--reasoning`.
    #[arg(long, env = "CODEX_MODEL_REASONING", hide = true)]
    pub model_reasoning: Option<ReasoningEffort>,

    /// Working directory for the agent; relative paths resolve against the
    /// current directory.
    #[arg(long, env = "CODEX_WORKDIR")]
    pub workdir: Option<PathBuf>,

    #[arg(long, env = "CODEX_SANDBOX_MODE", default_value = "danger-full-access")]
    pub sandbox_mode: SandboxMode,

    /// Path to the codex binary. Defaults to `codex` on PATH.
    #[arg(long, env = "CODEX_PATH")]
    pub codex_path: Option<PathBuf>,
}

impl CodexArgs {
    fn model_defaults(&self) -> ModelDefaults {
        ModelDefaults {
            model: self.model.trim().to_ascii_lowercase(),
            reasoning: self
                .reasoning
                .or(self.model_reasoning)
                .unwrap_or(ReasoningEffort::Medium),
        }
    }

    fn working_directory(&self) -> Option<PathBuf> {
        self.workdir
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(resolve_working_directory)
    }
}

#[derive(Parser, Debug)]
#[command(name = "codex-bridge", bin_name = "codex-bridge")]
#[command(about = "OpenAI-compatible chat completions bridge for the Codex CLI", version)]
pub struct BridgeCli {
    #[arg(long, short = 'H', env = "CODEX_BRIDGE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, short = 'p', env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[command(flatten)]
    pub codex: CodexArgs,

    /// Require this key as a bearer token or x-api-key. Auth is off when unset.
    #[arg(long, env = "CODEX_BRIDGE_API_KEY")]
    pub api_key: Option<String>,

    /// Where session to thread bindings are persisted.
    #[arg(long, env = "CODEX_BRIDGE_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    #[arg(
        long,
        env = "CODEX_NETWORK_ACCESS",
        default_value = "false",
        value_parser = parse_bool,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub network_access: bool,

    #[arg(
        long,
        env = "CODEX_WEB_SEARCH",
        default_value = "false",
        value_parser = parse_bool,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub web_search: bool,

    #[arg(long, env = "CODEX_APPROVAL_POLICY", default_value = "never")]
    pub approval_policy: ApprovalPolicy,

    #[arg(
        long,
        env = "CODEX_SKIP_GIT_CHECK",
        default_value = "true",
        value_parser = parse_bool,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub skip_git_check: bool,

    /// Log request summaries and backend payloads.
    #[arg(
        long,
        env = "CODEX_LOG_REQUESTS",
        default_value = "false",
        value_parser = parse_bool,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub log_requests: bool,

    /// Reject chat requests that carry no session identifier.
    #[arg(
        long,
        env = "CODEX_REQUIRE_SESSION_ID",
        default_value = "false",
        value_parser = parse_bool,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub require_session_id: bool,

    /// Maximum request body size, e.g. `10mb`.
    #[arg(long, env = "CODEX_JSON_LIMIT", default_value = "10mb", value_parser = parse_size)]
    pub json_limit: usize,

    /// Where downloaded and decoded images are written while a turn runs.
    #[arg(long, env = "CODEX_ATTACHMENT_DIR")]
    pub attachment_dir: Option<PathBuf>,
}

impl BridgeCli {
    pub fn into_config(self) -> BridgeConfig {
        let models = self.codex.model_defaults();
        let threads = ThreadDefaults {
            sandbox_mode: Some(self.codex.sandbox_mode),
            working_directory: self.codex.working_directory(),
            skip_git_repo_check: self.skip_git_check,
            network_access: Some(self.network_access),
            web_search: Some(self.web_search),
            approval_policy: Some(self.approval_policy),
        };
        BridgeConfig {
            host: self.host,
            port: self.port,
            models,
            api_key: self.api_key.filter(|key| !key.is_empty()),
            state_file: Some(
                self.state_file
                    .unwrap_or_else(|| default_state_file(BRIDGE_STATE_FILE)),
            ),
            threads,
            log_requests: self.log_requests,
            require_session_id: self.require_session_id,
            json_limit: self.json_limit,
            codex_path: self.codex.codex_path,
            attachment_dir: self.attachment_dir,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "codex-chat", bin_name = "codex-chat")]
#[command(about = "Interactive terminal chat with the Codex CLI", version)]
pub struct ChatCli {
    #[command(flatten)]
    pub codex: CodexArgs,

    /// Where the current thread id is remembered between runs.
    #[arg(long, env = "CODEX_CHAT_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

impl ChatCli {
    pub fn into_config(self) -> ChatConfig {
        let models = self.codex.model_defaults();
        let threads = ThreadDefaults {
            sandbox_mode: Some(self.codex.sandbox_mode),
            working_directory: self.codex.working_directory(),
            skip_git_repo_check: true,
            network_access: None,
            web_search: None,
            approval_policy: None,
        };
        ChatConfig {
            models,
            threads,
            state_file: self
                .state_file
                .unwrap_or_else(|| default_state_file(CHAT_STATE_FILE)),
            codex_path: self.codex.codex_path,
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to init logging: {0}")]
    Logging(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Entry point of the `codex-bridge` binary.
pub fn run_bridge() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    let cli = BridgeCli::parse();
    init_logging("info")?;
    let config = cli.into_config();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime
        .block_on(crate::run_server(config))
        .map_err(|err| CliError::Server(err.to_string()))
}

/// Entry point of the `codex-chat` binary.
pub fn run_chat() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    let cli = ChatCli::parse();
    init_logging("warn")?;
    let config = cli.into_config();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    crate::chat::run_repl(config, &runtime)?;
    Ok(())
}

pub fn init_logging(default_filter: &str) -> Result<(), CliError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| CliError::Logging(err.to_string()))
}
