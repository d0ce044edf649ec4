//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kerntuned",
    about = "Auto-tune kernel parameters from BPF resource-pressure events",
    after_help = "\
EXAMPLES:
    sudo kerntuned                          Run with defaults
    sudo kerntuned --legacy                 Force reduced BPF feature set
    sudo kerntuned --poll-timeout 250       Faster shutdown, busier loop"
)]
pub struct Args {
    /// Directory holding the probe and tuner BPF objects
    #[arg(long, value_name = "DIR")]
    pub bpf_dir: Option<PathBuf>,

    /// bpffs directory the shared maps are pinned under
    #[arg(long, value_name = "DIR")]
    pub pin_dir: Option<PathBuf>,

    /// Force legacy BPF support regardless of what probing finds
    #[arg(long)]
    pub legacy: bool,

    /// Ring buffer poll timeout in milliseconds (bounds shutdown latency)
    #[arg(long, default_value = "1000", value_name = "MS")]
    pub poll_timeout: u64,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
