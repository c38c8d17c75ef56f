pub mod analyze;
pub mod cache;
pub mod init;
pub mod status;

use anyhow::{Context, Result};
use senti_core::config::{Config, senti_dir};
use senti_core::engine::Engine;
use std::path::PathBuf;

pub struct Paths {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub db: PathBuf,
}

pub fn paths() -> Paths {
    let dir = senti_dir();
    Paths {
        config: dir.join("config.toml"),
        db: dir.join("senti.db"),
        dir,
    }
}

/// Load config (with `SENTI_*` overrides) and open the engine on the
/// initialized database.
pub fn open_engine() -> Result<(Paths, Engine)> {
    let paths = paths();
    if !paths.db.exists() {
        anyhow::bail!("senti not initialized. Run `senti init` first.");
    }
    let config = Config::load_with_env(&paths.config).context("loading config")?;
    let engine = Engine::open(config, &paths.db).context("opening engine")?;
    Ok((paths, engine))
}

/// Shorten text for one-line display.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("short  text", 20), "short text");
        assert_eq!(preview("a fairly long line of text", 10), "a fairl...");
    }
}
