use anyhow::Result;
use chrono::{Local, NaiveTime};
use colored::Colorize;
use senti_core::analysis::comprehend::ComprehendBackend;
use senti_core::db;
use senti_core::models::BackendKind;
use std::time::Duration;

use super::open_engine;

pub fn run() -> Result<()> {
    let (paths, engine) = open_engine()?;
    let config = engine.config();
    let conn = engine.conn();

    let is_wal = db::verify_wal_mode(conn)?;
    let report = engine.daily_report();
    let stats = engine.cache_stats();
    let persisted = db::cache_entry_count(conn)?;
    let stored = engine.stored_result_count()?;

    println!("{}", "senti status".cyan().bold());
    println!();

    println!("  {} {}", "Database:".white(), paths.db.display());
    println!(
        "  {} {}",
        "WAL mode:".white(),
        if is_wal {
            "enabled".green()
        } else {
            "disabled".red()
        }
    );
    println!("  {} {}", "Config:".white(), paths.config.display());
    println!();

    println!("{}", "Budget".white().bold());
    println!("  {} {}", "Day:".white(), report.day.to_string().cyan());
    let spent = format!("${:.4} of ${:.2}", report.spent_today, report.daily_limit);
    println!(
        "  {} {}",
        "Spent:".white(),
        if report.remaining <= 0.0 {
            spent.red()
        } else {
            spent.cyan()
        }
    );
    println!(
        "  {} {}",
        "Resets in:".white(),
        until_local_midnight().yellow()
    );
    println!(
        "  {} {}",
        "Paid requests:".white(),
        report.request_count.to_string().cyan()
    );
    println!(
        "  {} {}",
        "Cache hits:".white(),
        report.cache_hit_count.to_string().cyan()
    );
    println!();

    println!("{}", "Cache".white().bold());
    println!(
        "  {} {} / {}",
        "Entries:".white(),
        stats.size.to_string().cyan(),
        config.cache.max_entries
    );
    println!("  {} {}", "Persisted:".white(), persisted.to_string().cyan());
    println!(
        "  {} {}h",
        "TTL:".white(),
        config.cache.ttl_hours.to_string().cyan()
    );
    println!();

    println!("{}", "Backends".white().bold());
    let chain = engine.router().chain();
    if chain.is_empty() {
        println!("  {}", "local analyzer only".yellow());
    } else {
        for (kind, stage) in chain.iter().zip(["primary", "secondary"]) {
            let note = match kind {
                BackendKind::Comprehend => {
                    let comprehend =
                        ComprehendBackend::new(&config.backends.comprehend, Duration::ZERO);
                    if comprehend.is_available() {
                        format!("({} found)", config.backends.comprehend.program).green()
                    } else {
                        format!(
                            "({} not found, requests fall through)",
                            config.backends.comprehend.program
                        )
                        .red()
                    }
                }
                BackendKind::Command => {
                    format!("({})", config.backends.command.program).dimmed()
                }
            };
            println!(
                "  {} {} {}",
                format!("{stage}:").white(),
                kind.to_string().cyan(),
                note
            );
        }
        println!("  {} local analyzer", "fallback:".white());
    }
    println!();

    println!("{}", "Results".white().bold());
    println!("  {} {}", "Stored:".white(), stored.to_string().cyan());

    Ok(())
}

/// Time left until the budget day rolls over, as `HhMMm`.
fn until_local_midnight() -> String {
    let now = Local::now().naive_local();
    let midnight = now
        .date()
        .succ_opt()
        .map(|d| d.and_time(NaiveTime::MIN))
        .unwrap_or(now);
    let minutes = (midnight - now).num_minutes().max(0);
    format!("{}h{:02}m", minutes / 60, minutes % 60)
}
