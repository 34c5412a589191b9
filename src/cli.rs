use clap::Parser;
use std::path::PathBuf;

/// rogctld - keyboard and thermal control daemon for ROG laptops
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Remap Fn+arrow keys to PgUp/PgDown
    #[arg(long = "remap", default_value = "false")]
    pub remap: bool,

    /// Enable automatic thermal profile switching on power events
    #[arg(long = "auto-thermal", default_value = "false")]
    pub auto_thermal: bool,

    /// Program(s) the ROG key cycles through (repeatable)
    #[arg(long = "rog")]
    pub rog: Vec<String>,

    /// State file path (default: /var/lib/rogctld/state.json)
    #[arg(short = 's', long = "state-file")]
    pub state_file: Option<PathBuf>,

    /// Exercise everything except real hardware writes
    #[arg(long = "dry-run", default_value = "false")]
    pub dry_run: bool,
}
