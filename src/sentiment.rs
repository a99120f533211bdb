//! # Sentiment
//! Pluggable sentiment scoring for listing text.
//!
//! [`SentimentScorer`] is the capability the pipeline depends on; the bundled
//! [`SentimentAnalyzer`] is a lexicon + rules valence scorer producing a
//! compound score in `[-1, 1]`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

static LEXICON: Lazy<HashMap<String, f64>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, f64>>(raw).unwrap_or_else(|e| {
        tracing::error!(target: "pipeline", error = %e, "bundled sentiment lexicon is invalid");
        HashMap::new()
    })
});

/// Label thresholds on the compound score (inclusive).
pub const POSITIVE_THRESHOLD: f64 = 0.05;
pub const NEGATIVE_THRESHOLD: f64 = -0.05;

// Empirical constants of the valence model.
const BOOST_INCR: f64 = 0.293;
const BOOST_DECR: f64 = -0.293;
const CAPS_INCR: f64 = 0.733;
const NEGATION_SCALAR: f64 = -0.74;
const NORMALIZE_ALPHA: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// `>= 0.05` positive, `<= -0.05` negative, anything else (NaN included) neutral.
    pub fn from_compound(compound: f64) -> Self {
        if compound >= POSITIVE_THRESHOLD {
            SentimentLabel::Positive
        } else if compound <= NEGATIVE_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentResult {
    pub compound: f64,
    pub label: SentimentLabel,
}

impl SentimentResult {
    pub fn from_compound(compound: f64) -> Self {
        Self {
            compound,
            label: SentimentLabel::from_compound(compound),
        }
    }
}

/// Side-effect free text scorer. Implementors only provide `compound`; the
/// listing concatenation and the label policy are shared.
pub trait SentimentScorer: Send + Sync {
    fn compound(&self, text: &str) -> f64;

    fn score(&self, title: &str, description: &str) -> SentimentResult {
        let text = scoring_text(title, description);
        SentimentResult::from_compound(self.compound(&text))
    }
}

/// `title + ". " + description`, both HTML-decoded and whitespace-collapsed.
pub fn scoring_text(title: &str, description: &str) -> String {
    format!("{}. {}", clean_text(title), clean_text(description))
}

fn clean_text(s: &str) -> String {
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
    let decoded = html_escape::decode_html_entities(s);
    RE_WS.replace_all(&decoded, " ").trim().to_string()
}

#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_valence(&self, w: &str) -> Option<f64> {
        LEXICON.get(w).copied()
    }

    /// Sum of per-token valences after boosters, caps emphasis, negation and
    /// "but" re-weighting. Returned unnormalized.
    pub fn raw_valence(&self, text: &str) -> f64 {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return 0.0;
        }
        let lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
        let caps_differ = caps_differential(&tokens);

        let mut valences: Vec<f64> = Vec::with_capacity(tokens.len());
        for i in 0..tokens.len() {
            let w = lowered[i].as_str();
            let kind_of = w == "kind" && lowered.get(i + 1).map(String::as_str) == Some("of");
            if booster(w).is_some() || kind_of {
                valences.push(0.0);
                continue;
            }
            let Some(mut v) = self.word_valence(w) else {
                valences.push(0.0);
                continue;
            };

            if caps_differ && is_all_caps(&tokens[i]) {
                v += CAPS_INCR.copysign(v);
            }

            // look back up to three tokens for intensifiers and negators
            for back in 1..=3usize {
                if i < back {
                    break;
                }
                let prev = lowered[i - back].as_str();
                if self.word_valence(prev).is_none() {
                    let mut s = booster_scalar(prev, &tokens[i - back], v, caps_differ);
                    if back == 2 {
                        s *= 0.95;
                    } else if back == 3 {
                        s *= 0.9;
                    }
                    v += s;
                }
                if is_negator(prev) {
                    v *= NEGATION_SCALAR;
                }
            }
            valences.push(v);
        }

        apply_but_rule(&lowered, &mut valences);

        let mut sum: f64 = valences.iter().sum();
        let emphasis = punctuation_emphasis(text);
        if sum > 0.0 {
            sum += emphasis;
        } else if sum < 0.0 {
            sum -= emphasis;
        }
        sum
    }
}

impl SentimentScorer for SentimentAnalyzer {
    fn compound(&self, text: &str) -> f64 {
        normalize(self.raw_valence(text))
    }
}

/// Map an unbounded valence sum into `[-1, 1]`.
pub fn normalize(score: f64) -> f64 {
    if score == 0.0 {
        return 0.0;
    }
    (score / (score * score + NORMALIZE_ALPHA).sqrt()).clamp(-1.0, 1.0)
}

/// Whitespace tokens with surrounding punctuation stripped. Tokens that become
/// one char or shorter keep their punctuation (emoticon-like fragments).
fn tokenize(s: &str) -> Vec<String> {
    s.split_whitespace()
        .filter_map(|raw| {
            let stripped = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'');
            if stripped.chars().count() <= 1 {
                if raw.chars().count() <= 1 {
                    None
                } else {
                    Some(raw.to_string())
                }
            } else {
                Some(stripped.to_string())
            }
        })
        .collect()
}

fn is_all_caps(tok: &str) -> bool {
    tok.chars().any(|c| c.is_alphabetic()) && !tok.chars().any(|c| c.is_lowercase())
}

/// True when some, but not all, tokens are shouted.
fn caps_differential(tokens: &[String]) -> bool {
    let caps = tokens.iter().filter(|t| is_all_caps(t)).count();
    caps > 0 && caps < tokens.len()
}

fn booster(w: &str) -> Option<f64> {
    match w {
        "absolutely" | "amazingly" | "completely" | "considerably" | "decidedly" | "deeply"
        | "enormously" | "entirely" | "especially" | "exceptionally" | "extremely"
        | "fabulously" | "greatly" | "highly" | "hugely" | "incredibly" | "intensely"
        | "majorly" | "more" | "most" | "particularly" | "purely" | "quite" | "really"
        | "remarkably" | "so" | "substantially" | "super" | "thoroughly" | "totally"
        | "tremendously" | "truly" | "uber" | "unbelievably" | "unusually" | "utterly"
        | "very" => Some(BOOST_INCR),
        "almost" | "barely" | "hardly" | "less" | "little" | "marginally" | "occasionally"
        | "partly" | "scarcely" | "slightly" | "somewhat" | "sorta" => Some(BOOST_DECR),
        _ => None,
    }
}

fn booster_scalar(lower: &str, original: &str, valence: f64, caps_differ: bool) -> f64 {
    let Some(mut s) = booster(lower) else {
        return 0.0;
    };
    if valence < 0.0 {
        s = -s;
    }
    if caps_differ && is_all_caps(original) {
        s += CAPS_INCR.copysign(valence);
    }
    s
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "nothing"
            | "nor"
            | "neither"
            | "without"
            | "cannot"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "won't"
            | "can't"
            | "don't"
            | "doesn't"
            | "didn't"
            | "shouldn't"
            | "wouldn't"
            | "couldn't"
            | "hasn't"
            | "haven't"
    ) || tok.ends_with("n't")
}

/// Sentiment after "but" dominates: before × 0.5, after × 1.5.
fn apply_but_rule(lowered: &[String], valences: &mut [f64]) {
    let Some(pos) = lowered.iter().position(|t| t == "but") else {
        return;
    };
    for (i, v) in valences.iter_mut().enumerate() {
        if i < pos {
            *v *= 0.5;
        } else if i > pos {
            *v *= 1.5;
        }
    }
}

fn punctuation_emphasis(text: &str) -> f64 {
    let excl = text.matches('!').count().min(4) as f64 * 0.292;
    let qm = text.matches('?').count();
    let q = match qm {
        0 | 1 => 0.0,
        2 | 3 => qm as f64 * 0.18,
        _ => 0.96,
    };
    excl + q
}
