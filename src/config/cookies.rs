// src/config/cookies.rs
// Session cookie parsing - accepts every format operators paste in

use crate::error::{BotError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::BTreeMap;

/// Parsed session cookies. `c_user` and `xs` are mandatory; `datr`/`fr` and
/// anything else the platform hands out ride along in the map.
///
/// BTreeMap so `to_cookie_string` is deterministic (round-trip modulo order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    /// Build from explicit c_user/xs values (the FB_C_USER + FB_XS env path).
    pub fn from_parts(
        c_user: &str,
        xs: &str,
        datr: Option<&str>,
        fr: Option<&str>,
    ) -> Result<Self> {
        let mut cookies = BTreeMap::new();
        cookies.insert("c_user".to_string(), c_user.trim().to_string());
        cookies.insert("xs".to_string(), xs.trim().to_string());
        if let Some(datr) = datr {
            cookies.insert("datr".to_string(), datr.trim().to_string());
        }
        if let Some(fr) = fr {
            cookies.insert("fr".to_string(), fr.trim().to_string());
        }
        let jar = Self { cookies };
        jar.validate()?;
        Ok(jar)
    }

    /// Parse cookies from any of the accepted input forms:
    /// JSON array (`[{name, value, ...}]`), JSON object (`{name: value}`),
    /// cookie header (`k=v; k=v`), Netscape tab-separated export, or base64
    /// of any of the above.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(BotError::Config("cookie input is empty".to_string()));
        }

        if let Some(jar) = Self::try_parse_inner(trimmed) {
            jar.validate()?;
            return Ok(jar);
        }

        // Base64 of any accepted form
        if let Ok(decoded) = BASE64.decode(trimmed.as_bytes())
            && let Ok(text) = String::from_utf8(decoded)
            && let Some(jar) = Self::try_parse_inner(text.trim())
        {
            jar.validate()?;
            return Ok(jar);
        }

        Err(BotError::Config(
            "unrecognized cookie format (expected JSON array/object, cookie header, or Netscape export)"
                .to_string(),
        ))
    }

    fn try_parse_inner(input: &str) -> Option<Self> {
        if input.starts_with('[') {
            return Self::parse_json_array(input);
        }
        if input.starts_with('{') {
            return Self::parse_json_object(input);
        }
        if input.contains('\t') {
            return Self::parse_netscape(input);
        }
        if input.contains('=') {
            return Self::parse_header(input);
        }
        None
    }

    fn parse_json_array(input: &str) -> Option<Self> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(input).ok()?;
        let mut cookies = BTreeMap::new();
        for entry in entries {
            let name = entry.get("name")?.as_str()?;
            let value = entry.get("value")?.as_str()?;
            cookies.insert(name.to_string(), value.to_string());
        }
        Some(Self { cookies })
    }

    fn parse_json_object(input: &str) -> Option<Self> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(input).ok()?;
        let mut cookies = BTreeMap::new();
        for (name, value) in map {
            cookies.insert(name, value.as_str()?.to_string());
        }
        Some(Self { cookies })
    }

    /// `k=v; k=v` header form. Values may contain `=`; split on the first.
    fn parse_header(input: &str) -> Option<Self> {
        let mut cookies = BTreeMap::new();
        for pair in input.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=')?;
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
        if cookies.is_empty() {
            None
        } else {
            Some(Self { cookies })
        }
    }

    /// Netscape export: 7 tab-separated columns, name and value last.
    fn parse_netscape(input: &str) -> Option<Self> {
        let mut cookies = BTreeMap::new();
        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                continue;
            }
            cookies.insert(fields[5].to_string(), fields[6].to_string());
        }
        if cookies.is_empty() {
            None
        } else {
            Some(Self { cookies })
        }
    }

    fn validate(&self) -> Result<()> {
        for required in ["c_user", "xs"] {
            match self.cookies.get(required) {
                Some(v) if !v.is_empty() => {}
                _ => {
                    return Err(BotError::Config(format!(
                        "missing required cookie '{required}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// The account's own user id, parsed from `c_user`.
    pub fn user_id(&self) -> Result<i64> {
        let c_user = self
            .cookies
            .get("c_user")
            .ok_or_else(|| BotError::Config("missing required cookie 'c_user'".to_string()))?;
        c_user
            .parse::<i64>()
            .map_err(|_| BotError::Config(format!("c_user is not a numeric id: {c_user:?}")))
    }

    /// Serialize back to cookie header form (`k=v; k=v`).
    ///
    /// `parse(to_cookie_string())` is the identity modulo key order.
    pub fn to_cookie_string(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}
