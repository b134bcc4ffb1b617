//! Query command - report the compiler and optimization level of a cache

use anyhow::Result;
use keel_build::query_effective;
use std::path::Path;

/// Print `cc=<compiler> opt=<level>`
///
/// Always succeeds; fallbacks are announced on stderr.
pub fn run(cache_path: Option<&Path>, default_cc: &str, default_opt: u8) -> Result<()> {
    let result = query_effective(cache_path, default_cc, default_opt);
    if let Some(warning) = &result.warning {
        eprintln!("warning: {}", warning);
    }
    println!("{}", result.line());
    Ok(())
}
