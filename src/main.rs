// src/main.rs
// mesbot - unattended Messenger bot with an embedded admin control plane

use mesbot::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Config loads .env first so LOG_LEVEL from the file counts
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[mesbot] startup failed: {e}");
            std::process::exit(1);
        }
    };

    // "none" is the documented way to silence the bot; tracing spells it "off"
    let level = match config.log_level.as_str() {
        "none" => "off",
        other => other,
    };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    mesbot::bot::install_panic_hook();

    if let Err(e) = mesbot::bot::run(config).await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
