//! rdpshot: connect to one RDP target, capture its screen, emit a JSON record.
//!
//! ```text
//! rdpshot --target <ip[:port]>   Capture and print the record
//! rdpshot --config <path>        Load a custom config TOML
//! rdpshot --gen-config           Write default config to stdout
//! ```

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rdpshot::cli::Cli;
use rdpshot::config::AppConfig;
use rdpshot::driver::Driver;

/// Print the error and usage to stderr and exit with code 1.
fn usage_error(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}\n");
    eprintln!("{}", Cli::command().render_usage());
    std::process::exit(1);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", AppConfig::default_toml()?);
        return Ok(());
    }

    // Load config, then init tracing so a bad file can be reported.
    let loaded = AppConfig::load(&cli.config);
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Stdout carries only the record.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = &loaded {
        warn!("invalid config {}: {e}; using defaults", cli.config.display());
    }

    let target = match cli.build_target(&config) {
        Ok(target) => target,
        Err(e) => usage_error(e),
    };
    let connector = match config.connector() {
        Ok(connector) => connector,
        Err(e) => usage_error(format!("[network] {e}")),
    };

    info!("rdpshot v{}", env!("CARGO_PKG_VERSION"));
    info!("target: {target}, {}x{}", target.width(), target.height());
    info!("idle timeout: {}s", target.timeout_secs());

    let mut driver = Driver::new(
        connector,
        cli.output_sink(&config),
        config.session_settings(),
        config.image_format(),
    );
    driver.run(target).await?;

    Ok(())
}
