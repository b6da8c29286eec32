//! Small helpers shared across the bot.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the per-user configuration directory.
pub const CONFIG_DIR_NAME: &str = ".formdoc";

/// The user's home directory, falling back to the current directory.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `~/.formdoc`.
#[must_use]
pub fn config_dir() -> PathBuf {
    home_dir().join(CONFIG_DIR_NAME)
}

/// Generate a prefixed unique identifier.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// Generate a unique message identifier.
#[must_use]
pub fn generate_message_id() -> String {
    generate_id("msg")
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Split `text` into chunks of at most `max_len` bytes, preferring line
/// breaks and never cutting through a UTF-8 character.
#[must_use]
pub fn split_into_chunks(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len || max_len == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if !current.is_empty() && current.len() + line.len() + 1 > max_len {
            chunks.push(std::mem::take(&mut current));
        }

        if line.len() > max_len {
            let mut piece = String::new();
            for c in line.chars() {
                if piece.len() + c.len_utf8() > max_len {
                    chunks.push(std::mem::take(&mut piece));
                }
                piece.push(c);
            }
            current = piece;
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
