pub mod args;
pub mod auth;
pub mod history;
pub mod record;

pub use args::{Cli, CliCommand, HistoryCliArgs, RecordCliArgs};
pub use auth::handle_auth_command;
pub use history::handle_history_command;
pub use record::handle_record_command;
