//! Session history listing.

use super::args::HistoryCliArgs;
use crate::db::{self, SessionRepository};
use anyhow::Result;

pub fn handle_history_command(args: HistoryCliArgs) -> Result<()> {
    let conn = db::init_db()?;
    let records = SessionRepository::list(&conn, args.limit)?;

    if records.is_empty() {
        println!("No recorded sessions yet.");
        return Ok(());
    }

    for record in records {
        let upload = match (&record.drive_file_id, &record.upload_error) {
            (Some(id), _) => format!("drive:{id}"),
            (None, Some(err)) => format!("upload failed: {err}"),
            (None, None) => "-".to_string(),
        };
        println!(
            "{:>4}  {}  {:<14} {:>6}s  {:<22} {}",
            record.id,
            record.created_at,
            record.code,
            record.duration_seconds,
            record.outcome,
            upload,
        );
    }

    Ok(())
}
