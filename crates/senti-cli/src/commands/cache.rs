use anyhow::Result;
use colored::Colorize;

use super::open_engine;

pub fn run(clear: bool, purge_expired: bool) -> Result<()> {
    let (_paths, engine) = open_engine()?;

    if clear {
        let removed = engine.clear_cache()?;
        println!("  {} {} cached results", "Cleared".green(), removed);
        return Ok(());
    }

    if purge_expired {
        let removed = engine.purge_expired();
        engine.flush()?;
        println!("  {} {} expired results", "Purged".green(), removed);
        return Ok(());
    }

    let stats = engine.cache_stats();
    let config = engine.config();
    println!("{}", "senti cache".cyan().bold());
    println!();
    println!(
        "  {} {} / {}",
        "Entries:".white(),
        stats.size.to_string().cyan(),
        config.cache.max_entries
    );
    println!(
        "  {} {}h",
        "TTL:".white(),
        config.cache.ttl_hours.to_string().cyan()
    );
    println!(
        "  {} {}",
        "Persistence:".white(),
        if config.cache.persist {
            "on".green()
        } else {
            "off".yellow()
        }
    );
    Ok(())
}
