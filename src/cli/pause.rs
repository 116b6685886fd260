use crate::config::Config;
use crate::error::Result;
use crate::pause::{FilePauseGate, PauseChecker};

/// Pause remote mediation: new requests fall back to the agent's own prompt.
pub async fn run_pause(config: &Config) -> Result<()> {
    let gate = FilePauseGate::new(config.pause_file.clone());
    gate.set_paused(true)?;
    eprintln!("stopkran: paused ({})", gate.path().display());
    Ok(())
}

/// Resume remote mediation.
pub async fn run_resume(config: &Config) -> Result<()> {
    let gate = FilePauseGate::new(config.pause_file.clone());
    gate.set_paused(false)?;
    eprintln!("stopkran: resumed");
    Ok(())
}

/// Report the pause flag and whether a daemon answers on the socket.
pub async fn run_status(config: &Config) -> Result<()> {
    let gate = FilePauseGate::new(config.pause_file.clone());
    let running = tokio::net::UnixStream::connect(&config.socket_path)
        .await
        .is_ok();

    println!("mode:   {}", if gate.is_paused() { "paused" } else { "active" });
    println!(
        "daemon: {} ({})",
        if running { "running" } else { "not running" },
        config.socket_path.display()
    );
    println!(
        "owner:  {}",
        config
            .chat_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "not registered".into())
    );
    Ok(())
}
