//! Reply suggestions: model output parsing and canned fallbacks.

use palaver_core::{Direction, Message};

/// Always exactly this many suggestions, each non-empty.
pub const SUGGESTION_COUNT: usize = 3;

pub const FALLBACK_SUGGESTIONS: [&str; SUGGESTION_COUNT] = [
    "Thanks for reaching out! How can I help?",
    "Could you share a bit more detail about that?",
    "Let me check on this and get right back to you.",
];

/// Turn model output (one suggestion per line, bullets tolerated) into
/// exactly [`SUGGESTION_COUNT`] non-empty strings, padding from the canned
/// set when the model under-delivers.
pub fn parse_suggestions(output: &str) -> Vec<String> {
    let mut suggestions: Vec<String> = output
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .trim_matches('"')
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(SUGGESTION_COUNT)
        .collect();

    for fallback in FALLBACK_SUGGESTIONS {
        if suggestions.len() >= SUGGESTION_COUNT {
            break;
        }
        if !suggestions.iter().any(|s| s == fallback) {
            suggestions.push(fallback.to_string());
        }
    }
    suggestions
}

/// Compact conversation context for the prompt, oldest first.
pub fn conversation_context(recent_newest_first: &[Message]) -> String {
    recent_newest_first
        .iter()
        .rev()
        .filter_map(|message| {
            let content = message.content.as_deref()?;
            let speaker = match message.direction {
                Direction::Inbound => "customer",
                Direction::Outbound => "agent",
            };
            Some(format!("{speaker}: {content}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_bulleted_output() {
        let output = "- Sure, we ship worldwide.\n- Delivery takes 3-5 days.\n- Anything else?";
        let suggestions = parse_suggestions(output);
        assert_eq!(suggestions.len(), 3);
        assert_eq!(suggestions[0], "Sure, we ship worldwide.");
        assert_eq!(suggestions[2], "Anything else?");
    }

    #[test]
    fn test_numbered_output() {
        let output = "1. One\n2. Two\n3. Three\n4. Extra";
        let suggestions = parse_suggestions(output);
        assert_eq!(suggestions, vec!["One", "Two", "Three"]);
    }

    #[test]
    fn test_pads_short_output() {
        let suggestions = parse_suggestions("Just one idea");
        assert_eq!(suggestions.len(), SUGGESTION_COUNT);
        assert!(suggestions.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn test_empty_output_yields_fallbacks() {
        let suggestions = parse_suggestions("");
        assert_eq!(suggestions.len(), SUGGESTION_COUNT);
        assert_eq!(suggestions[0], FALLBACK_SUGGESTIONS[0]);
    }
}
