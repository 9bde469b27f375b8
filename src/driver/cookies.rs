//! Cookie input file parsing.
//!
//! Two layouts are accepted: a JSON list of cookie objects, or a flat
//! name -> value map (the domain is then defaulted from configuration).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One session cookie to inject before the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: Option<bool>,
    #[serde(rename = "httpOnly")]
    pub http_only: Option<bool>,
    #[serde(rename = "sameSite")]
    pub same_site: Option<String>,
    pub expiry: Option<f64>,
}

/// Parse a cookie file. Entries missing a name or value are skipped with a
/// warning; a list entry that is not an object is skipped likewise.
pub fn load_cookie_specs(path: &Path, default_domain: &str) -> Result<Vec<CookieSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cookie file {}", path.display()))?;
    let data: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse cookie file {}", path.display()))?;

    let mut cookies = Vec::new();

    match data {
        serde_json::Value::Array(entries) => {
            for entry in entries {
                match serde_json::from_value::<CookieSpec>(entry) {
                    Ok(c) if !c.name.is_empty() && !c.value.is_empty() => {
                        cookies.push(CookieSpec {
                            domain: c.domain.or_else(|| Some(default_domain.to_string())),
                            ..c
                        });
                    }
                    Ok(c) => warn!("Skipping cookie with empty name or value: {:?}", c.name),
                    Err(e) => warn!("Skipping malformed cookie entry: {}", e),
                }
            }
        }
        serde_json::Value::Object(map) => {
            for (name, value) in map {
                let Some(value) = value.as_str() else {
                    warn!("Skipping non-string cookie value for {}", name);
                    continue;
                };
                cookies.push(CookieSpec {
                    name,
                    value: value.to_string(),
                    domain: Some(default_domain.to_string()),
                    path: Some("/".to_string()),
                    secure: Some(true),
                    http_only: Some(false),
                    same_site: None,
                    expiry: None,
                });
            }
        }
        _ => anyhow::bail!(
            "cookie file {} must be a JSON list or object",
            path.display()
        ),
    }

    Ok(cookies)
}
