fn main() {
    if let Err(err) = codex_bridge::cli::run_chat() {
        tracing::error!(error = %err, "codex-chat failed");
        eprintln!("codex-chat: {err}");
        std::process::exit(1);
    }
}
