//! Command-line configuration and process setup.

use clap::Parser;
use tracing::Level;

use crate::commands::Command;

#[derive(Debug, Parser)]
#[command(name = "ring-dht", version, about = "Run and inspect an in-process DHT ring")]
pub struct CliConfig {
    /// Maximum log level written to stderr.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: Level,

    /// Print the result as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Installs logging, starts a runtime and executes the command.
    pub fn run(self) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(self.log_level)
            .with_writer(std::io::stderr)
            .init();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let result = runtime.block_on(self.command.execute())?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print!("{result}");
        }
        Ok(())
    }
}
