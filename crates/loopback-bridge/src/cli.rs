use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "loopback-bridge",
    version,
    about = "Publish remote stream endpoints as single-client loopback ports"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// URL to proxy; may be repeated (added to the config file's targets)
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// Path of the JSON-lines event log (overrides config file setting)
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Seconds a proxy waits for its local client, 0 to wait forever
    /// (overrides config file setting)
    #[arg(long)]
    pub listen_timeout_secs: Option<u64>,
}
