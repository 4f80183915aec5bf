use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "meetrec")]
#[command(about = "Automated Google Meet guest recorder", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Record a single meeting, then exit
    Record(RecordCliArgs),
    /// Authorize Drive uploads interactively
    Auth,
    /// List past recording sessions
    History(HistoryCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct RecordCliArgs {
    /// Meeting code in xxx-xxxx-xxx form
    pub meeting_code: String,
}

#[derive(ClapArgs, Debug)]
pub struct HistoryCliArgs {
    /// Maximum number of sessions to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}
