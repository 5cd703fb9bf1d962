// src/config/env_file.rs
// Line-based .env rewriting that preserves comments and unrelated keys

use crate::error::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// Apply `updates` to the env file at `path`, preserving comments, blank
/// lines, and keys that are not being updated. Keys not present in the file
/// are appended at the end. Values are quoted when they contain characters
/// that would break a naive `KEY=value` line.
pub fn rewrite(path: &Path, updates: &BTreeMap<String, String>) -> Result<()> {
    let original = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut remaining: BTreeMap<&str, &str> = updates
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut lines: Vec<String> = Vec::new();
    for line in original.lines() {
        match parse_line(line) {
            Some(key) => {
                if let Some(value) = remaining.remove(key) {
                    lines.push(format_line(key, value));
                } else {
                    lines.push(line.to_string());
                }
            }
            None => lines.push(line.to_string()),
        }
    }

    for (key, value) in remaining {
        lines.push(format_line(key, value));
    }

    let mut output = lines.join("\n");
    output.push('\n');
    std::fs::write(path, output)?;
    Ok(())
}

/// Extract the key of a `KEY=value` line, or None for comments/blank lines.
fn parse_line(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, _) = trimmed.split_once('=')?;
    let key = key.trim().strip_prefix("export ").unwrap_or(key.trim());
    if key.is_empty() { None } else { Some(key.trim()) }
}

/// Values containing space, quote, or `#` must be double-quoted.
fn format_line(key: &str, value: &str) -> String {
    let needs_quoting = value
        .chars()
        .any(|c| c.is_whitespace() || c == '"' || c == '#' || c == '\'');
    if needs_quoting {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("{key}=\"{escaped}\"")
    } else {
        format!("{key}={value}")
    }
}

/// Read a single key's current value from the env file, unquoting if needed.
/// Used only by tests and the dashboard round-trip; the live process reads
/// config through `std::env`.
pub fn read_key(path: &Path, key: &str) -> Result<Option<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    for line in content.lines() {
        if parse_line(line) == Some(key) {
            let raw = line
                .split_once('=')
                .map(|(_, v)| v.trim())
                .unwrap_or_default();
            return Ok(Some(unquote(raw)));
        }
    }
    Ok(None)
}

fn unquote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        raw[1..raw.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_env(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_rewrite_preserves_comments_and_unrelated_keys() {
        let (_dir, path) = write_env("# auth\nFB_COOKIES=abc\n\n# behaviour\nLOG_LEVEL=info\n");
        let mut updates = BTreeMap::new();
        updates.insert("LOG_LEVEL".to_string(), "debug".to_string());
        rewrite(&path, &updates).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# auth"));
        assert!(content.contains("FB_COOKIES=abc"));
        assert!(content.contains("LOG_LEVEL=debug"));
        assert!(!content.contains("LOG_LEVEL=info"));
    }

    #[test]
    fn test_rewrite_appends_new_keys() {
        let (_dir, path) = write_env("LOG_LEVEL=info\n");
        let mut updates = BTreeMap::new();
        updates.insert("SEND_RATE_PER_SEC".to_string(), "7".to_string());
        rewrite(&path, &updates).unwrap();
        assert_eq!(
            read_key(&path, "SEND_RATE_PER_SEC").unwrap().as_deref(),
            Some("7")
        );
    }

    #[test]
    fn test_values_with_spaces_are_quoted() {
        let (_dir, path) = write_env("");
        let mut updates = BTreeMap::new();
        updates.insert("GEMINI_MODEL".to_string(), "gemini flash #2".to_string());
        rewrite(&path, &updates).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("GEMINI_MODEL=\"gemini flash #2\""));
        assert_eq!(
            read_key(&path, "GEMINI_MODEL").unwrap().as_deref(),
            Some("gemini flash #2")
        );
    }

    #[test]
    fn test_rewrite_missing_file_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut updates = BTreeMap::new();
        updates.insert("LOG_LEVEL".to_string(), "warn".to_string());
        rewrite(&path, &updates).unwrap();
        assert_eq!(read_key(&path, "LOG_LEVEL").unwrap().as_deref(), Some("warn"));
    }

    #[test]
    fn test_export_prefix_recognized() {
        let (_dir, path) = write_env("export LOG_LEVEL=info\n");
        let mut updates = BTreeMap::new();
        updates.insert("LOG_LEVEL".to_string(), "error".to_string());
        rewrite(&path, &updates).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        // The updated line replaces the export form entirely
        assert!(content.contains("LOG_LEVEL=error"));
        assert!(!content.contains("info"));
    }
}
