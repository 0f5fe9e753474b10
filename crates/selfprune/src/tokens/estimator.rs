//! Word/punctuation token heuristic.

/// Tokens per word, in tenths (1.3 tokens per word).
pub const TOKENS_PER_WORD_TENTHS: usize = 13;

/// Tokens per structural punctuation character, in tenths (0.5).
const TOKENS_PER_SPECIAL_TENTHS: usize = 5;

/// Characters that tend to become their own token in code and markup.
fn is_special(c: char) -> bool {
    matches!(c, '{' | '}' | '[' | ']' | '<' | '>' | ':' | ',' | ';')
}

/// Estimate the token count of `text`.
///
/// `ceil(words * 1.3 + specials * 0.5)` where `words` counts
/// whitespace-separated runs and `specials` counts `{}[]<>:,;`. Computed in
/// integer tenths so the result never depends on float rounding.
///
/// ```
/// assert_eq!(selfprune::tokens::estimate("The quick brown fox jumps."), 7);
/// assert_eq!(selfprune::tokens::estimate(""), 0);
/// ```
pub fn estimate(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let words = text.split_whitespace().count();
    let specials = text.chars().filter(|c| is_special(*c)).count();
    (words * TOKENS_PER_WORD_TENTHS + specials * TOKENS_PER_SPECIAL_TENTHS).div_ceil(10)
}

/// Estimate tokens for arbitrary JSON content.
///
/// Strings are estimated as-is; anything structured (tool arguments, objects)
/// is serialized first.
pub fn count_message_tokens(content: &serde_json::Value) -> usize {
    match content {
        serde_json::Value::String(s) => estimate(s),
        serde_json::Value::Null => 0,
        other => estimate(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sentence_with_ordinary_punctuation() {
        // Five words; '.' is not in the special class.
        assert_eq!(estimate("The quick brown fox jumps."), 7);
    }

    #[test]
    fn empty_and_whitespace_only() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("   \n\t  "), 0);
    }

    #[test]
    fn special_characters_add_half_a_token() {
        // 1 word + 2 specials: ceil(1.3 + 1.0) = 3
        assert_eq!(estimate("{}"), 3);
        // 2 words + 1 special: ceil(2.6 + 0.5) = 4
        assert_eq!(estimate("key: value"), 4);
    }

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(estimate("a    b\n\n\nc"), estimate("a b c"));
    }

    #[test]
    fn round_numbers_stay_exact() {
        // 10 words * 1.3 = 13 exactly; float math would give 13.000000000000002.
        assert_eq!(estimate("a b c d e f g h i j"), 13);
    }

    #[test]
    fn json_content_is_stringified() {
        assert_eq!(
            count_message_tokens(&serde_json::json!("hello world")),
            estimate("hello world")
        );
        let obj = serde_json::json!({"location": "NYC"});
        assert_eq!(count_message_tokens(&obj), estimate(&obj.to_string()));
        assert_eq!(count_message_tokens(&serde_json::Value::Null), 0);
    }

    proptest! {
        #[test]
        fn matches_float_formula(text in "[a-z{}\\[\\]<>:,; \\n]{0,200}") {
            let words = text.split_whitespace().count() as f64;
            let specials = text.chars().filter(|c| is_special(*c)).count() as f64;
            let expected = (words * 1.3 + specials * 0.5 - 1e-9).ceil().max(0.0) as usize;
            prop_assert_eq!(estimate(&text), expected);
        }

        #[test]
        fn concatenation_never_shrinks(a in "[a-z ]{0,50}", b in "[a-z ]{0,50}") {
            let joined = format!("{a} {b}");
            prop_assert!(estimate(&joined) >= estimate(&a));
        }
    }
}
