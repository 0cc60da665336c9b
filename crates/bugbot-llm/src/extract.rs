//! JSON extraction from model output
//!
//! Triage depends on structured responses, but models wrap JSON in prose or
//! code fences. This module pulls the first complete JSON object out of a
//! completion, preferring a fenced ```json block, then a balanced-brace scan
//! that respects string literals.

/// Extract the first complete JSON object from model output.
pub fn extract_json_object(input: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced_json(input) {
        return validate_json(&fenced);
    }

    let mut in_string = false;
    let mut escape = false;
    let mut depth = 0usize;
    let mut start_idx: Option<usize> = None;

    for (idx, ch) in input.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start_idx = Some(idx);
                }
                depth = depth.saturating_add(1);
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(start) = start_idx {
                            return validate_json(&input[start..=idx]);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    None
}

fn validate_json(candidate: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(candidate)
        .ok()
        .map(|_| candidate.to_string())
}

fn extract_fenced_json(input: &str) -> Option<String> {
    let fence_start = input.find("```json")?;
    let after = &input[fence_start + "```json".len()..];
    let fence_end = after.find("```")?;
    let candidate = after[..fence_end].trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulls_fenced_json() {
        let input = "Here you go:\n```json\n{\"keep\": true}\n```\nanything else";
        assert_eq!(extract_json_object(input), Some("{\"keep\": true}".to_string()));
    }

    #[test]
    fn pulls_bare_json_with_nested_braces_and_strings() {
        let input = r#"The verdict is {"severity": "high", "note": "brace } in string", "nested": {"a": 1}} done"#;
        let extracted = extract_json_object(input).unwrap();
        let value: serde_json::Value = serde_json::from_str(&extracted).unwrap();
        assert_eq!(value["severity"], "high");
        assert_eq!(value["nested"]["a"], 1);
    }

    #[test]
    fn rejects_unbalanced_or_invalid_json() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{broken"), None);
    }
}
