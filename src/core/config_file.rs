// src/core/config_file.rs

//! A line-oriented editor for `anvil.conf`-style `key = value` files (§6).
//!
//! Unrelated keys and comments are preserved verbatim; edits are atomic
//! (write to a new file in the same directory, then `rename` over the
//! original), matching the teacher's config-loading style in
//! `Config::from_file` generalised to a format that must also support
//! in-place rewriting.

use crate::core::errors::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
enum Line {
    /// A recognised `key = value` line, keeping the exact original key
    /// spelling so re-serialisation is a no-op for untouched lines.
    KeyValue { key: String, value: String },
    /// A comment, blank line, or anything else passed through unchanged.
    Other(String),
}

/// An in-memory, order-preserving view of a config file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    lines: Vec<Line>,
}

impl ConfigFile {
    /// Loads a config file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = fs::read_to_string(&path)?;
        Ok(Self::parse(path, &contents))
    }

    fn parse(path: PathBuf, contents: &str) -> Self {
        let lines = contents
            .lines()
            .map(|raw| match split_key_value(raw) {
                Some((key, value)) => Line::KeyValue {
                    key: key.to_string(),
                    value: value.to_string(),
                },
                None => Line::Other(raw.to_string()),
            })
            .collect();
        Self { path, lines }
    }

    /// Looks up a key's current value, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::KeyValue { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Returns every key whose name starts with `prefix`, along with its
    /// suffix past the prefix. Used to enumerate `database::<uuid>::*`
    /// blocks without knowing the peer UUIDs up front.
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.lines.iter().filter_map(move |line| match line {
            Line::KeyValue { key, value } if key.starts_with(prefix) => {
                Some((key.as_str(), value.as_str()))
            }
            _ => None,
        })
    }

    /// Sets a key's value, rewriting its existing line in place, or
    /// appending a new line if the key was absent.
    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            if let Line::KeyValue { key: k, value: v } = line
                && k == key
            {
                *v = value.to_string();
                return;
            }
        }
        self.lines.push(Line::KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Serialises the current state back to `key = value` text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::KeyValue { key, value } => {
                    out.push_str(key);
                    out.push_str(" = ");
                    out.push_str(value);
                }
                Line::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }

    /// Atomically writes the current state back to the original path:
    /// write to a sibling temp file, then `rename` over the original.
    pub fn save(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("anvil.conf")
        ));
        fs::write(&tmp_path, self.render())?;
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), "config file saved atomically");
        Ok(())
    }
}

/// Splits a `key = value` line, tolerating arbitrary whitespace around
/// `=`. Lines with no `=`, or whose trimmed form starts with `#`, are not
/// key/value lines.
fn split_key_value(raw: &str) -> Option<(&str, &str)> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = raw.split_once('=')?;
    Some((key.trim(), value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConfigFile {
        ConfigFile::parse(
            PathBuf::from("anvil.conf"),
            "# a comment\n\
             sys::database::log_transactions = 1\n\
             database::11111111-1111-1111-1111-111111111111::host = 10.0.0.1\n\
             \n\
             database::11111111-1111-1111-1111-111111111111::port = 5432\n",
        )
    }

    #[test]
    fn get_returns_existing_value() {
        let cfg = sample();
        assert_eq!(cfg.get("sys::database::log_transactions"), Some("1"));
    }

    #[test]
    fn set_rewrites_existing_key_in_place() {
        let mut cfg = sample();
        cfg.set("sys::database::log_transactions", "0");
        assert_eq!(cfg.get("sys::database::log_transactions"), Some("0"));
        // Comment and blank line survive untouched.
        assert!(cfg.render().contains("# a comment"));
    }

    #[test]
    fn set_appends_new_key() {
        let mut cfg = sample();
        cfg.set("sys::database::maximum_batch_size", "25000");
        assert_eq!(cfg.get("sys::database::maximum_batch_size"), Some("25000"));
    }

    #[test]
    fn keys_with_prefix_enumerates_peer_block() {
        let cfg = sample();
        let found: Vec<_> = cfg
            .keys_with_prefix("database::11111111-1111-1111-1111-111111111111::")
            .collect();
        assert_eq!(found.len(), 2);
    }
}
