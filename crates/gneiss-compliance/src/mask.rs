//! Sensitive-field masking.
//!
//! Masking is positional, not cryptographic: enough of the value survives
//! for correlation during an investigation (first/last characters), while
//! the sensitive middle is unrecoverable from the persisted payload.
//!
//! Rules:
//! - strings of ≤ 4 chars: `"****"`
//! - strings of 5–8 chars: first 2 + `*` × (len − 2)
//! - longer strings: first 2 + `*` × (len − 4) + last 2
//! - numbers: `"****"` (a masked number is no longer a number)
//! - anything else (bool, null, arrays, objects): `"[REDACTED]"`
//!
//! Matching is ASCII case-insensitive: a property is masked when its key
//! contains any profile pattern, and template text gets pattern occurrences
//! replaced outright.

use serde_json::Value;

/// Replacement for non-string, non-numeric sensitive values and for
/// sensitive substrings in message templates.
pub const REDACTED: &str = "[REDACTED]";

/// True when `key` contains any of `patterns`, ignoring ASCII case.
pub fn key_matches(key: &str, patterns: &[&str]) -> bool {
    patterns
        .iter()
        .any(|pattern| find_ascii_ci(key, pattern, 0).is_some())
}

/// Masks a string per the positional rules above.
///
/// Lengths are measured in characters, not bytes.
pub fn mask_string(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len();

    if len <= 4 {
        return "****".to_string();
    }

    let mut masked = String::with_capacity(len);
    masked.extend(&chars[..2]);
    if len > 8 {
        masked.extend(std::iter::repeat('*').take(len - 4));
        masked.extend(&chars[len - 2..]);
    } else {
        masked.extend(std::iter::repeat('*').take(len - 2));
    }
    masked
}

/// Masks one property value.
pub fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(mask_string(text)),
        Value::Number(_) => Value::String("****".to_string()),
        _ => Value::String(REDACTED.to_string()),
    }
}

/// Replaces every ASCII case-insensitive occurrence of each pattern in
/// `template` with [`REDACTED`].
pub fn redact_template(template: &str, patterns: &[&str]) -> String {
    let mut result = template.to_string();
    for pattern in patterns {
        if pattern.is_empty() {
            continue;
        }
        let mut out = String::with_capacity(result.len());
        let mut pos = 0;
        while let Some(found) = find_ascii_ci(&result, pattern, pos) {
            out.push_str(&result[pos..found]);
            out.push_str(REDACTED);
            pos = found + pattern.len();
        }
        out.push_str(&result[pos..]);
        result = out;
    }
    result
}

/// ASCII case-insensitive substring search starting at byte `from`.
///
/// Patterns are ASCII, so any match lies on UTF-8 character boundaries and
/// the returned index is splice-safe.
fn find_ascii_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < from + needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("", "****")]
    #[test_case("a", "****")]
    #[test_case("abcd", "****")]
    #[test_case("abcde", "ab***")]
    #[test_case("12345678", "12******")]
    #[test_case("123456789", "12*****89")]
    #[test_case("123-45-6789", "12*******89")]
    fn string_masking_rules(input: &str, expected: &str) {
        assert_eq!(mask_string(input), expected);
    }

    #[test]
    fn masked_string_keeps_char_length_above_four() {
        for input in ["hello", "longer-value", "日本語のテキスト"] {
            let masked = mask_string(input);
            assert_eq!(masked.chars().count(), input.chars().count());
        }
    }

    #[test]
    fn numbers_and_other_types_are_flattened() {
        assert_eq!(mask_value(&Value::from(4111_1111u64)), Value::from("****"));
        assert_eq!(mask_value(&Value::from(1.5)), Value::from("****"));
        assert_eq!(mask_value(&Value::Bool(true)), Value::from(REDACTED));
        assert_eq!(mask_value(&Value::Null), Value::from(REDACTED));
        assert_eq!(
            mask_value(&serde_json::json!({ "nested": 1 })),
            Value::from(REDACTED)
        );
    }

    #[test]
    fn key_matching_is_case_insensitive_contains() {
        let patterns = &["ssn", "password"];
        assert!(key_matches("SSN", patterns));
        assert!(key_matches("userPassword", patterns));
        assert!(key_matches("Password_Hash", patterns));
        assert!(!key_matches("PatientId", patterns));
        assert!(!key_matches("username", patterns));
    }

    #[test]
    fn template_redaction_replaces_all_occurrences() {
        let out = redact_template("SSN lookup: ssn={Ssn}", &["ssn"]);
        assert_eq!(out, "[REDACTED] lookup: [REDACTED]={[REDACTED]}");
    }

    #[test]
    fn template_redaction_handles_multiple_patterns() {
        let out = redact_template("card and cvv present", &["card", "cvv"]);
        assert_eq!(out, "[REDACTED] and [REDACTED] present");
    }

    #[test]
    fn template_without_patterns_is_unchanged() {
        let template = "user {UserId} viewed chart";
        assert_eq!(redact_template(template, &["ssn"]), template);
    }

    proptest! {
        #[test]
        fn masked_strings_never_leak_long_inputs(input in "[a-zA-Z0-9]{9,40}") {
            // For inputs over 8 chars only the first and last two survive;
            // the middle never appears in the masked output.
            let masked = mask_string(&input);
            let chars: Vec<char> = input.chars().collect();
            let middle: String = chars[2..chars.len() - 2].iter().collect();
            prop_assert!(!masked.contains(&middle));
        }

        #[test]
        fn redaction_removes_every_pattern_occurrence(
            prefix in "[a-z ]{0,10}",
            suffix in "[a-z ]{0,10}",
        ) {
            let template = format!("{prefix}SSN{suffix}");
            let out = redact_template(&template, &["ssn"]);
            prop_assert!(find_ascii_ci(&out, "ssn", 0).is_none());
        }
    }
}
