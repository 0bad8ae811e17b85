mod agriha;
mod server;
mod timer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::FmtSubscriber;

use agriha::config::Config;

#[cfg(unix)]
const CONFIG_FILE_PATH: &'static str = "/etc/agriha/agriha-daemon.yaml";

#[cfg(not(unix))]
const CONFIG_FILE_PATH: &'static str = "./agriha-daemon.yaml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// YAML config file path
    #[clap(short = 'c', long = "config", default_value = CONFIG_FILE_PATH, parse(from_os_str))]
    config: std::path::PathBuf,

    /// Enable debug logging
    #[clap(long)]
    debug: bool,
}

fn setup_tracing(debug: bool) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if debug { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn main() {
    let args = Args::parse();

    setup_tracing(args.debug);

    tracing::info!("Using config file: {}", args.config.display());

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("config error: {}", err);
            std::process::exit(1);
        }
    };

    // SIGTERM/SIGINT drop the flag; every activity loop watches it
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting signal handler");

    if let Err(err) = agriha::daemon::run(config, running) {
        tracing::error!("startup failed: {}", err);
        std::process::exit(1);
    }
}
