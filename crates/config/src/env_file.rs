//! Durable `KEY="VALUE"` persistence for `.env` style files.
//!
//! Generated credentials are written back so a restarted gateway picks them up
//! through the normal environment loading path.

use crate::ConfigError;
use regex::{NoExpand, Regex};
use std::{fs, io::ErrorKind, path::Path};

/// Replace the `key` line in `content`, or append one when it is missing.
///
/// Values are always written quoted. Matching happens at line granularity, so
/// `KEYS=` is never mistaken for `KEY=`.
pub fn upsert_env_line(content: &str, key: &str, value: &str) -> Result<String, ConfigError> {
    let pattern = Regex::new(&format!(r"(?m)^{}\s*=[^\n]*", regex::escape(key)))?;
    let line = format!("{key}=\"{value}\"");

    if pattern.is_match(content) {
        return Ok(pattern.replace_all(content, NoExpand(&line)).into_owned());
    }

    let delimiter = if !content.is_empty() && !content.ends_with('\n') {
        "\n"
    } else {
        ""
    };
    Ok(format!("{content}{delimiter}{line}"))
}

/// Write `key="value"` into the env file at `path`, creating the file if needed
pub fn write_env_value<P: AsRef<Path>>(path: P, key: &str, value: &str) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let updated = upsert_env_line(&content, key, value)?;
    fs::write(path, updated)?;
    Ok(())
}
