fn main() {
    if let Err(err) = codex_bridge::cli::run_bridge() {
        tracing::error!(error = %err, "codex-bridge failed");
        eprintln!("codex-bridge: {err}");
        std::process::exit(1);
    }
}
