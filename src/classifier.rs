//! Broadcast-signature classifier.
//!
//! Campus-wide broadcast emails carry one of a small set of boilerplate
//! phrases (list footers, distribution notices). A message is relevant
//! iff its plain text contains at least one of them. Matching is case-
//! and diacritic-insensitive, and whitespace runs count as a single
//! separator.

use regex::Regex;

/// Boilerplate phrases that mark a campus broadcast message.
const SIGNATURE_PHRASES: &[&str] = &[
    "this message was sent to the entire campus community",
    "sent on behalf of the student activities office",
    "distributed via the campus events mailing list",
    "to all students and staff",
    "campus-wide announcement",
];

/// Pure, stateless relevance classifier.
pub struct Classifier {
    patterns: Vec<Regex>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Compile the fixed signature phrases.
    pub fn new() -> Self {
        let patterns = SIGNATURE_PHRASES
            .iter()
            .map(|phrase| compile_phrase(phrase))
            .collect();
        Self { patterns }
    }

    /// True iff the text contains at least one broadcast signature.
    pub fn is_relevant(&self, text: &str) -> bool {
        let folded = fold_diacritics(text);
        self.patterns.iter().any(|p| p.is_match(&folded))
    }
}

/// Compile one phrase into a case-insensitive regex where any whitespace
/// run in the phrase matches any whitespace run in the text.
fn compile_phrase(phrase: &str) -> Regex {
    let escaped: Vec<String> = phrase
        .split_whitespace()
        .map(regex::escape)
        .collect();
    let pattern = format!("(?i){}", escaped.join(r"\s+"));
    // The phrase list is fixed and escaped, so compilation cannot fail.
    Regex::new(&pattern).expect("signature phrase regex")
}

/// Strip combining marks from common Latin accented characters.
fn fold_diacritics(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
            'ñ' | 'Ñ' => 'n',
            'ç' | 'Ç' => 'c',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_phrase() {
        let classifier = Classifier::new();
        assert!(classifier.is_relevant(
            "Reminder: concert tonight.\n\n\
             This message was sent to the entire campus community."
        ));
    }

    #[test]
    fn matches_case_insensitively() {
        let classifier = Classifier::new();
        assert!(classifier.is_relevant("CAMPUS-WIDE ANNOUNCEMENT: library closure"));
    }

    #[test]
    fn matches_across_whitespace_runs() {
        let classifier = Classifier::new();
        assert!(classifier.is_relevant(
            "this message was   sent\nto the entire\tcampus community"
        ));
    }

    #[test]
    fn matches_with_diacritics() {
        let classifier = Classifier::new();
        assert!(classifier.is_relevant("Cámpus-wïde ännouncement: fiesta"));
    }

    #[test]
    fn rejects_unrelated_text() {
        let classifier = Classifier::new();
        assert!(!classifier.is_relevant("Hi, can you send me last week's notes?"));
        assert!(!classifier.is_relevant(""));
    }

    #[test]
    fn rejects_partial_phrase() {
        let classifier = Classifier::new();
        assert!(!classifier.is_relevant("the campus community met yesterday"));
    }
}
