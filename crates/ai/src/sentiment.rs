//! Sentiment classification with a deterministic keyword fallback.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: f64,
}

const POSITIVE_WORDS: &[&str] = &[
    "thanks", "thank", "great", "good", "love", "awesome", "perfect", "excellent", "happy",
    "amazing", "helpful",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "hate", "angry", "refund", "cancel", "worst", "broken",
    "disappointed", "useless", "slow",
];

/// Deterministic classification used when the model provider is unavailable
/// or returns unusable output. Score is clamped to [0, 1].
pub fn keyword_sentiment(content: &str) -> Sentiment {
    let lower = content.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let positives = words.iter().filter(|w| POSITIVE_WORDS.contains(w)).count() as i64;
    let negatives = words.iter().filter(|w| NEGATIVE_WORDS.contains(w)).count() as i64;

    let net = positives - negatives;
    let label = match net.signum() {
        1 => SentimentLabel::Positive,
        -1 => SentimentLabel::Negative,
        _ => SentimentLabel::Neutral,
    };
    let score = (0.5 + 0.1 * net as f64).clamp(0.0, 1.0);
    Sentiment { label, score }
}

/// Parse the model's JSON answer; `None` means fall back to keywords.
pub fn parse_model_sentiment(output: &str) -> Option<Sentiment> {
    let value: serde_json::Value = serde_json::from_str(output.trim()).ok()?;
    let label = match value.get("label")?.as_str()? {
        "positive" => SentimentLabel::Positive,
        "neutral" => SentimentLabel::Neutral,
        "negative" => SentimentLabel::Negative,
        _ => return None,
    };
    let score = value.get("score")?.as_f64()?;
    if !(0.0..=1.0).contains(&score) {
        return None;
    }
    Some(Sentiment { label, score })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_keywords() {
        let s = keyword_sentiment("Thanks, this is great!");
        assert_eq!(s.label, SentimentLabel::Positive);
        assert!(s.score > 0.5);
    }

    #[test]
    fn test_negative_keywords() {
        let s = keyword_sentiment("this is terrible, I want a refund");
        assert_eq!(s.label, SentimentLabel::Negative);
        assert!(s.score < 0.5);
    }

    #[test]
    fn test_neutral_default() {
        let s = keyword_sentiment("what time do you open tomorrow?");
        assert_eq!(s.label, SentimentLabel::Neutral);
        assert!((s.score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_always_in_range() {
        for content in [
            "",
            "hate hate hate hate hate hate hate hate",
            "great great great great great great great great",
            "❤️ 😀 #@!",
        ] {
            let s = keyword_sentiment(content);
            assert!((0.0..=1.0).contains(&s.score), "score out of range for {content:?}");
        }
    }

    #[test]
    fn test_parse_model_output() {
        let s = parse_model_sentiment(r#"{"label": "negative", "score": 0.82}"#).unwrap();
        assert_eq!(s.label, SentimentLabel::Negative);
        assert!((s.score - 0.82).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_model_sentiment("the user seems upset").is_none());
        assert!(parse_model_sentiment(r#"{"label": "rage", "score": 0.5}"#).is_none());
        assert!(parse_model_sentiment(r#"{"label": "positive", "score": 7}"#).is_none());
    }
}
