use std::path::{Path, PathBuf};

use codex_bridge_backend::{ApprovalPolicy, SandboxMode, ThreadOptions};

use crate::models::{ModelDefaults, ResolvedModel};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_JSON_LIMIT: usize = 10 * 1024 * 1024;
const STATE_DIR: &str = "codex-bridge";

/// Settings copied onto every backend thread the bridge creates.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadDefaults {
    pub sandbox_mode: Option<SandboxMode>,
    pub working_directory: Option<PathBuf>,
    pub skip_git_repo_check: bool,
    pub network_access: Option<bool>,
    pub web_search: Option<bool>,
    pub approval_policy: Option<ApprovalPolicy>,
}

impl Default for ThreadDefaults {
    fn default() -> Self {
        Self {
            sandbox_mode: Some(SandboxMode::DangerFullAccess),
            working_directory: None,
            skip_git_repo_check: true,
            network_access: Some(false),
            web_search: Some(false),
            approval_policy: Some(ApprovalPolicy::Never),
        }
    }
}

impl ThreadDefaults {
    pub fn thread_options(&self, model: &ResolvedModel) -> ThreadOptions {
        ThreadOptions {
            model: Some(model.model.clone()),
            reasoning_effort: Some(model.reasoning),
            sandbox_mode: self.sandbox_mode,
            working_directory: self.working_directory.clone(),
            skip_git_repo_check: self.skip_git_repo_check,
            network_access_enabled: self.network_access,
            web_search_enabled: self.web_search,
            approval_policy: self.approval_policy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub models: ModelDefaults,
    /// Auth is disabled when unset.
    pub api_key: Option<String>,
    /// `None` keeps session bindings in memory only.
    pub state_file: Option<PathBuf>,
    pub threads: ThreadDefaults,
    pub log_requests: bool,
    pub require_session_id: bool,
    pub json_limit: usize,
    pub codex_path: Option<PathBuf>,
    /// Parent of downloaded and decoded image directories; the system temp
    /// dir when unset.
    pub attachment_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            models: ModelDefaults::default(),
            api_key: None,
            state_file: None,
            threads: ThreadDefaults::default(),
            log_requests: false,
            require_session_id: false,
            json_limit: DEFAULT_JSON_LIMIT,
            codex_path: None,
            attachment_dir: None,
        }
    }
}

/// `<data dir>/codex-bridge/<file_name>`, or the current directory when the
/// platform has no data dir.
pub fn default_state_file(file_name: &str) -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(STATE_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(file_name)
}

/// Absolute form of a configured working directory.
pub fn resolve_working_directory(value: &Path) -> PathBuf {
    if value.is_absolute() {
        return value.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(value),
        Err(_) => value.to_path_buf(),
    }
}

pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got '{other}'")),
    }
}

/// Byte size such as `512`, `100kb` or `10mb`.
pub fn parse_size(value: &str) -> Result<usize, String> {
    let normalized = value.trim().to_ascii_lowercase();
    let split = normalized
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(normalized.len());
    let (digits, unit) = normalized.split_at(split);
    let amount: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{value}'"))?;
    let multiplier: usize = match unit.trim() {
        "" | "b" => 1,
        "kb" | "k" => 1024,
        "mb" | "m" => 1024 * 1024,
        "gb" | "g" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size unit '{other}'")),
    };
    amount
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{value}' is too large"))
}
