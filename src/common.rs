// Shared IO and progress helpers used by every pipeline stage.

use anyhow::{Context, Error, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, Cursor, Read, Write};
use std::path::PathBuf;

/// Quiet mode suppresses progress bars (set VERSIM_QUIET=1, used by tests).
pub fn is_quiet() -> bool {
    std::env::var("VERSIM_QUIET").is_ok()
}

pub fn build_pbar(len: usize, units: &str) -> ProgressBar {
    if is_quiet() {
        return ProgressBar::hidden();
    }
    let pbar = ProgressBar::new(len as u64);
    pbar.set_style(
        ProgressStyle::with_template("{msg:<18} [{bar:40}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("=> "),
    );
    pbar.set_message(units.to_string());
    pbar
}

/// Read a whole file into memory and hand back a buffered reader over it.
pub fn read_pathbuf_to_mem(path: &PathBuf) -> Result<BufReader<Cursor<Vec<u8>>>, Error> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .with_context(|| format!("Failed to read {:?}", path))?;
    Ok(BufReader::new(Cursor::new(contents)))
}

/// Write a byte buffer to a path, creating parent directories as needed.
pub fn write_mem_to_pathbuf(contents: &[u8], path: &PathBuf) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let mut file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    file.write_all(contents)
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

// Debug logging macro - only prints when config.debug is true
#[macro_export]
macro_rules! debug_println {
    ($config:expr, $($arg:tt)*) => {
        if $config.debug {
            println!($($arg)*);
        }
    };
}
