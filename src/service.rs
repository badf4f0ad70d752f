//! Boot script integration
//!
//! `autostart` appends a marked block that launches the agent to the board's
//! boot script; `disable_autostart` strips it again. Only text between the
//! markers is ever touched.

use anyhow::{Context, Result};
use std::path::Path;

pub const START_MARKER: &str = "# Added by board-agent";
pub const END_MARKER: &str = "# End board-agent";

fn read_script(script: &Path) -> Result<String> {
    match std::fs::read_to_string(script) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("reading {}", script.display())),
    }
}

/// Append the start block running `command`
///
/// Returns `false` when the script already has one.
pub fn autostart(script: &Path, command: &str) -> Result<bool> {
    let mut text = read_script(script)?;
    if text.lines().any(|line| line.starts_with(START_MARKER)) {
        return Ok(false);
    }

    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&format!("\n{START_MARKER}\n{command}\n{END_MARKER}\n"));

    std::fs::write(script, text).with_context(|| format!("writing {}", script.display()))?;
    Ok(true)
}

/// Remove every complete start block
///
/// Returns `false`, leaving the file alone, when no terminated block was
/// found.
pub fn disable_autostart(script: &Path) -> Result<bool> {
    let text = std::fs::read_to_string(script)
        .with_context(|| format!("reading {}", script.display()))?;

    let mut kept = String::with_capacity(text.len());
    let mut in_block = false;
    let mut changed = false;

    for line in text.split_inclusive('\n') {
        if line.starts_with(START_MARKER) {
            in_block = true;
            continue;
        }
        if in_block {
            if line.starts_with(END_MARKER) {
                in_block = false;
                changed = true;
            }
            continue;
        }
        kept.push_str(line);
    }

    if !changed {
        return Ok(false);
    }

    let tmp = script.with_extension("board-agent.tmp");
    std::fs::write(&tmp, kept).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, script)
        .with_context(|| format!("replacing {}", script.display()))?;
    Ok(true)
}
