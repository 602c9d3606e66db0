mod cli;
mod config;
mod decoder;
mod error;
mod event;
mod harness;
mod output;
mod region;
mod tracer;
mod trampoline;
mod watchdog;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("trapline only supports x86_64 and aarch64");

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;

use cli::Cli;
use output::OutputManager;
use tracer::Tracer;

fn main() -> Result<()> {
    env_logger::init();

    // Usage errors exit 1, help and version exit 0
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let config = config::load_config(&cli).context("failed to load config")?;
    let code = decoder::decode(&cli.code, config.odd_length).context("failed to decode code")?;
    log::debug!("Decoded {} bytes: {}", code.len(), code.to_hex());

    if config.trace.enabled {
        let output_manager = OutputManager::new(cli.output.as_deref(), cli.verbose, cli.no_color)?;
        let mut tracer = Tracer::new(config, code, output_manager);
        let outcome = tracer.run().context("tracer failed")?;
        outcome.mirror();
    }

    let never = harness::run(&config, &code).context("failed to start code")?;
    match never {}
}
