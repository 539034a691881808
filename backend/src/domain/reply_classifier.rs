//! Deterministic intent scoring for operator replies.
//!
//! Each intent owns a set of weighted case-insensitive patterns. The reply's
//! own words (quoted history removed) are scored against every set; the
//! highest total wins. No match, or a tie for the top score, is
//! [`ReplyIntent::Unknown`].

use regex::Regex;

use super::inbound_email::ReplyIntent;

const MAX_REASON_LEN: usize = 500;

const DELETED_PATTERNS: &[(&str, u32)] = &[
    (
        r"\b(has|have|had)\s+been\s+(permanently\s+|successfully\s+)?(deleted|erased|removed|purged)\b",
        3,
    ),
    (
        r"\bwe\s+(have\s+)?(now\s+)?(deleted|erased|removed|purged)\s+(your|the|all)\b",
        3,
    ),
    (
        r"\b(deletion|erasure|removal)\s+(request\s+)?(is|was|has\s+been)\s+(complete|completed|processed|carried\s+out)\b",
        3,
    ),
    (
        r"\bno\s+longer\s+(holds?|has|have|stores?|process(es)?|retains?)\b",
        2,
    ),
    (r"\b(successfully|permanently)\s+(deleted|erased|removed)\b", 2),
];

const REJECTED_PATTERNS: &[(&str, u32)] = &[
    (
        r"\b(cannot|can't|can\s+not|unable\s+to|will\s+not|won't|decline\s+to|refuse\s+to)\s+(delete|erase|remove|comply|honou?r)\b",
        4,
    ),
    (
        r"\b(decline[sd]?|reject(s|ed)?|den(y|ies|ied)|refuse[sd]?)\s+(your|the|this)\s+(request|demand)\b",
        4,
    ),
    (
        r"\b(has|have)\s+not\s+been\s+(deleted|erased|removed)\b",
        3,
    ),
    (
        r"\b(legal|legitimate|statutory|regulatory)\s+(obligations?|interests?|requirements?|basis)\b",
        2,
    ),
    (
        r"\bnot\s+(subject\s+to|covered\s+by|applicable\s+to)\b",
        2,
    ),
    (r"\bexempt(ion)?\b", 1),
];

const NEED_INFO_PATTERNS: &[(&str, u32)] = &[
    (
        r"\b(verify|confirm|prove)\s+your\s+(identity|residency|email|account)\b",
        3,
    ),
    (r"\b(please|kindly)\s+(provide|send|supply|attach)\b", 2),
    (
        r"\b(additional|more|further)\s+(information|details|documentation)\b",
        2,
    ),
    (
        r"\b(proof|copy)\s+of\s+(identity|id|identification|address|residency)\b",
        2,
    ),
    (r"\bcould\s+you\s+(please\s+)?(provide|confirm|send)\b", 2),
    (r"\bunable\s+to\s+(locate|find|identify)\b", 2),
    // A refusal that waits on the requester outweighs the refusal itself.
    (
        r"\b(until|unless|without|before)\s+(you\s+|we\s+(have\s+)?(receive|received)\s+)?(verify|confirm|prove|provide|send|supply|proof|verification)\b",
        3,
    ),
];

/// Quoted-history markers: everything from the first match on is dropped.
const QUOTE_MARKERS: &[&str] = &[
    r"(?m)^\s*On\s.+wrote:\s*$",
    r"(?m)^\s*-{2,}\s*Original Message\s*-{2,}",
    r"(?m)^\s*From:\s.+$",
];

struct IntentPatterns {
    intent: ReplyIntent,
    patterns: Vec<(Regex, u32)>,
}

impl IntentPatterns {
    fn compile(intent: ReplyIntent, table: &[(&str, u32)]) -> Result<Self, regex::Error> {
        let patterns = table
            .iter()
            .map(|(pattern, weight)| Ok((Regex::new(&format!("(?i){pattern}"))?, *weight)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { intent, patterns })
    }

    fn score(&self, text: &str) -> u32 {
        self.patterns
            .iter()
            .filter(|(regex, _)| regex.is_match(text))
            .map(|(_, weight)| weight)
            .sum()
    }

    fn first_match_start(&self, text: &str) -> Option<usize> {
        self.patterns
            .iter()
            .filter_map(|(regex, _)| regex.find(text).map(|m| m.start()))
            .min()
    }
}

/// Outcome of classifying one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub intent: ReplyIntent,
    /// Sentence that triggered a rejection, when the intent is rejected.
    pub rejection_reason: Option<String>,
}

/// Keyword/pattern reply classifier.
///
/// # Examples
/// ```
/// use erasure_engine::domain::{ReplyClassifier, ReplyIntent};
///
/// let classifier = ReplyClassifier::standard().expect("patterns compile");
/// let outcome = classifier.classify("Re: erasure", "Your data has been deleted.", "");
/// assert_eq!(outcome.intent, ReplyIntent::Deleted);
/// ```
pub struct ReplyClassifier {
    intents: Vec<IntentPatterns>,
    quote_markers: Vec<Regex>,
    quoted_line: Regex,
    html_tag: Regex,
}

impl ReplyClassifier {
    /// Classifier with the built-in English pattern tables.
    pub fn standard() -> Result<Self, regex::Error> {
        Ok(Self {
            intents: vec![
                IntentPatterns::compile(ReplyIntent::Deleted, DELETED_PATTERNS)?,
                IntentPatterns::compile(ReplyIntent::Rejected, REJECTED_PATTERNS)?,
                IntentPatterns::compile(ReplyIntent::NeedInfo, NEED_INFO_PATTERNS)?,
            ],
            quote_markers: QUOTE_MARKERS
                .iter()
                .map(|pattern| Regex::new(pattern))
                .collect::<Result<_, _>>()?,
            quoted_line: Regex::new(r"(?m)^\s*>.*$")?,
            html_tag: Regex::new(r"(?s)<[^>]*>")?,
        })
    }

    /// Score subject and body. `html` is only used when `text` is blank.
    pub fn classify(&self, subject: &str, text: &str, html: &str) -> Classification {
        let body = if text.trim().is_empty() {
            self.html_to_text(html)
        } else {
            text.to_owned()
        };
        let corpus = format!("{subject}\n{}", self.strip_quoted(&body));

        let mut best: Option<(&IntentPatterns, u32)> = None;
        let mut tied = false;
        for intent in &self.intents {
            let score = intent.score(&corpus);
            match best {
                Some((_, top)) if score == top => tied = true,
                Some((_, top)) if score < top => {}
                _ => {
                    best = Some((intent, score));
                    tied = false;
                }
            }
        }

        match best {
            Some((winner, score)) if score > 0 && !tied => Classification {
                intent: winner.intent,
                rejection_reason: (winner.intent == ReplyIntent::Rejected)
                    .then(|| sentence_at(&corpus, winner.first_match_start(&corpus)))
                    .flatten(),
            },
            _ => Classification {
                intent: ReplyIntent::Unknown,
                rejection_reason: None,
            },
        }
    }

    fn strip_quoted(&self, body: &str) -> String {
        let cut = self
            .quote_markers
            .iter()
            .filter_map(|marker| marker.find(body).map(|m| m.start()))
            .min()
            .unwrap_or(body.len());
        let own = body.get(..cut).unwrap_or(body);
        self.quoted_line.replace_all(own, "").into_owned()
    }

    fn html_to_text(&self, html: &str) -> String {
        self.html_tag
            .replace_all(html, " ")
            .replace("&nbsp;", " ")
            .replace("&#39;", "'")
            .replace("&apos;", "'")
            .replace("&quot;", "\"")
            .replace("&amp;", "&")
    }
}

/// The sentence of `text` containing byte offset `at`, trimmed and bounded.
fn sentence_at(text: &str, at: Option<usize>) -> Option<String> {
    let at = at?;
    let is_boundary = |c: char| matches!(c, '.' | '!' | '?' | '\n');
    let head = text.get(..at)?;
    let tail = text.get(at..)?;
    let start = head.rfind(is_boundary).map_or(0, |idx| idx + 1);
    let end = tail
        .find(is_boundary)
        .map_or(text.len(), |idx| at + idx + 1);
    let sentence = text.get(start..end)?.trim();
    if sentence.is_empty() {
        return None;
    }
    Some(sentence.chars().take(MAX_REASON_LEN).collect())
}

#[cfg(test)]
#[path = "reply_classifier_tests.rs"]
mod tests;
