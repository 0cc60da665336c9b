//! Secret and URL redaction for logs and error messages
//!
//! Pattern-based redaction applied to anything that leaves the process: log
//! lines, HTTP error bodies, and text bundled into LLM prompts. RPC URLs are
//! additionally stripped of their query strings, which is where providers put
//! API keys.

use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Pattern-based redaction engine
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<(&'static str, Regex)>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor {
    /// Create a redactor with the default pattern set.
    pub fn new() -> Self {
        let mut patterns = Vec::new();

        // Hosted-LLM API keys (sk-...)
        if let Ok(re) = Regex::new(r"sk-[a-zA-Z0-9-]{20,}") {
            patterns.push(("API_KEY", re));
        }

        // GitHub tokens
        if let Ok(re) = Regex::new(r"gh[pousr]_[0-9a-zA-Z]{36,}") {
            patterns.push(("GITHUB_TOKEN", re));
        }

        // Bearer credentials in headers or messages
        if let Ok(re) = Regex::new(r"(?i)bearer\s+[a-zA-Z0-9._~+/=-]{8,}") {
            patterns.push(("BEARER_TOKEN", re));
        }

        // 64-hex private keys, with or without 0x
        if let Ok(re) = Regex::new(r"\b(0x)?[0-9a-fA-F]{64}\b") {
            patterns.push(("PRIVATE_KEY", re));
        }

        // key=value style secrets
        if let Ok(re) =
            Regex::new(r#"(?i)(api[_-]?key|secret|token|password)\s*[=:]\s*[^\s"'&]{6,}"#)
        {
            patterns.push(("SECRET", re));
        }

        Self { patterns }
    }

    /// Replace every secret occurrence with a typed placeholder.
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (label, re) in &self.patterns {
            out = re
                .replace_all(&out, format!("[REDACTED_{label}]"))
                .to_string();
        }
        out
    }

    /// Redact and count occurrences per pattern type.
    pub fn redact_counted(&self, text: &str) -> (String, HashMap<String, usize>) {
        let mut out = text.to_string();
        let mut counts = HashMap::new();
        for (label, re) in &self.patterns {
            let hits = re.find_iter(&out).count();
            if hits > 0 {
                debug!("redacting {} occurrence(s) of {}", hits, label);
                counts.insert((*label).to_string(), hits);
                out = re
                    .replace_all(&out, format!("[REDACTED_{label}]"))
                    .to_string();
            }
        }
        (out, counts)
    }
}

/// Strip the query string from a URL so provider keys never surface.
pub fn strip_url_query(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        // Not a parseable URL; fall back to a textual cut.
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

/// Redact an error message for user-visible surfaces, truncating long text.
pub fn redact_error_message(message: &str) -> String {
    let redacted = Redactor::new().redact(message);
    if redacted.len() > 256 {
        let cut = redacted
            .char_indices()
            .take_while(|(i, _)| *i < 256)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}... [truncated]", &redacted[..cut])
    } else {
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_api_keys_and_bearer_tokens() {
        let redactor = Redactor::new();
        let input = "call failed: Authorization: Bearer abcd1234efgh5678 key sk-proj-abcdefghijklmnopqrstuv";
        let out = redactor.redact(input);
        assert!(!out.contains("abcd1234efgh5678"));
        assert!(!out.contains("sk-proj-"));
        assert!(out.contains("[REDACTED_"));
    }

    #[test]
    fn redacts_private_keys() {
        let redactor = Redactor::new();
        let key = format!("0x{}", "ab".repeat(32));
        let out = redactor.redact(&format!("signer {key} rejected"));
        assert!(!out.contains(&key));
    }

    #[test]
    fn strips_query_from_rpc_urls() {
        assert_eq!(
            strip_url_query("https://rpc.example.test/v2/mainnet?apikey=supersecret"),
            "https://rpc.example.test/v2/mainnet"
        );
        assert_eq!(
            strip_url_query("not a url?apikey=supersecret"),
            "not a url"
        );
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(1000);
        let out = redact_error_message(&long);
        assert!(out.len() < 300);
        assert!(out.ends_with("[truncated]"));
    }
}
