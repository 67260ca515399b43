//! Output sanitation: secret redaction and JSON envelope unwrapping

use serde_json::Value;

const REDACTED: &str = "[REDACTED]";
const MIN_SECRET_LEN: usize = 4;

/// Replaces known secret values in agent output
#[derive(Debug, Clone, Default)]
pub struct SecretRedactor {
    /// Longest first, so a secret that contains another is replaced whole
    secrets: Vec<String>,
}

impl SecretRedactor {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<String> = values
            .into_iter()
            .map(Into::into)
            .filter(|s| s.len() >= MIN_SECRET_LEN)
            .collect();
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();
        Self { secrets }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), REDACTED);
            }
        }
        out
    }
}

/// Extract the text from a leaked CLI result envelope
///
/// Handles `{"type":"result","result":"..."}`, a bare `{"result":"..."}`, and
/// either of those inside a ```json fence. Anything else is returned as-is.
pub fn sanitize_result_text(text: &str) -> String {
    let trimmed = text.trim();
    let candidate = strip_fence(trimmed).unwrap_or(trimmed);

    if candidate.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            if let Some(Value::String(result)) = map.get("result") {
                return result.clone();
            }
        }
    }
    text.to_string()
}

fn strip_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let body = rest.strip_suffix("```")?;
    Some(body.trim())
}
