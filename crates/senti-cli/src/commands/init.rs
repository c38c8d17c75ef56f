use anyhow::{Context, Result};
use colored::Colorize;
use senti_core::config::Config;
use senti_core::db;

use super::paths;

pub fn run() -> Result<()> {
    let paths = paths();

    std::fs::create_dir_all(&paths.dir).context("creating ~/.senti/")?;

    if !paths.config.exists() {
        Config::default().save(&paths.config)?;
        println!("  {} {}", "Created".green(), paths.config.display());
    } else {
        println!("  {} {}", "Exists".yellow(), paths.config.display());
    }

    let db_existed = paths.db.exists();
    let conn = db::open_db(&paths.db)?;
    let label = if db_existed { "Exists".yellow() } else { "Created".green() };
    if db::verify_wal_mode(&conn)? {
        println!("  {} {} (WAL mode)", label, paths.db.display());
    } else {
        println!(
            "  {} {} (warning: WAL mode not enabled)",
            "Exists".yellow(),
            paths.db.display()
        );
    }

    println!();
    println!(
        "senti is ready. Set {} or edit {} to change the daily budget.",
        "SENTI_DAILY_BUDGET_LIMIT".cyan(),
        paths.config.display()
    );
    Ok(())
}
