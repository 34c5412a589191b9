use anyhow::{Result, anyhow};
use clap::Parser;
use log::LevelFilter;
use syslog::{BasicLogger, Facility, Formatter3164};

use rogctld::{application::Application, cli::Cli};

fn init_log() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "rogctld".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(LevelFilter::Info))
            .map_err(|e| anyhow!("{e}"))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_log()?;

    Application::builder()
        .with_cli(Cli::parse())
        .build()
        .run()
        .await
}
