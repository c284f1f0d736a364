use std::fs::File;
use std::io::{self, BufReader};

use anyhow::{Context, Result};
use log::{error, info};

use tracerobot::config::cli_args::CliArgs;
use tracerobot::config::plugin_config::PluginConfig;
use tracerobot::{EventDriver, TraceRecorder, TraceRobotPlugin};

fn main() {
    let args = CliArgs::parse_args();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.get_log_level()))
        .init();

    if let Err(e) = run(&args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: &CliArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => PluginConfig::from_file(path)?,
        None => PluginConfig::default(),
    }
    .with_robot_output(args.robot_output.as_deref());

    let plugin = TraceRobotPlugin::new(config, TraceRecorder::new());
    let mut driver = EventDriver::new(plugin);

    let summary = match args.events_path() {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open event stream: {}", path.display()))?;
            driver.run(BufReader::new(file))?
        }
        None => driver.run(io::stdin().lock())?,
    };

    info!(
        "{} tests recorded, {} failed",
        summary.tests, summary.failed
    );
    Ok(())
}
