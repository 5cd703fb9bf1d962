// src/llm/json.rs
// Lenient JSON parsing for structured data buried in LLM output

use serde::de::DeserializeOwned;

/// Parse JSON from LLM output with fallback strategies, in order: direct
/// parse, markdown-fence strip, first balanced `{...}`/`[...]` block.
pub fn parse_json_lenient<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let trimmed = content.trim();

    if let Ok(v) = serde_json::from_str::<T>(trimmed) {
        return Ok(v);
    }

    let stripped = strip_code_fences(trimmed);
    if stripped != trimmed
        && let Ok(v) = serde_json::from_str::<T>(stripped)
    {
        return Ok(v);
    }

    if let Some(extracted) = extract_json_block(trimmed)
        && let Ok(v) = serde_json::from_str::<T>(extracted)
    {
        return Ok(v);
    }

    Err(format!(
        "failed to parse JSON from LLM output; content starts: {}",
        &trimmed[..trimmed.len().min(160)]
    ))
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json")
        && let Some(inner) = rest.strip_suffix("```")
    {
        return inner.trim();
    }
    if let Some(rest) = trimmed.strip_prefix("```")
        && let Some(inner) = rest.strip_suffix("```")
    {
        return inner.trim();
    }
    trimmed
}

/// First balanced `{...}` or `[...]` block, string-aware.
fn extract_json_block(s: &str) -> Option<&str> {
    let (open, close, start) = {
        let brace = s.find('{');
        let bracket = s.find('[');
        match (brace, bracket) {
            (Some(b), Some(k)) if b < k => ('{', '}', b),
            (Some(_), Some(k)) => ('[', ']', k),
            (Some(b), None) => ('{', '}', b),
            (None, Some(k)) => ('[', ']', k),
            (None, None) => return None,
        }
    };

    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for i in start..bytes.len() {
        let ch = bytes[i] as char;
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
