//! Tokenizing and stemming of verbalizations and query words

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word pattern"));

/// Stemmed form of a phrase.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Terms {
    /// Lower-cased words joined by single spaces.
    pub normalized: String,
    /// One stem per word, in order.
    pub stems: Vec<String>,
}

impl Terms {
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Every stem of `query` occurs in `self`.
    pub fn contains_all(&self, query: &Terms) -> bool {
        query.stems.iter().all(|stem| self.stems.contains(stem))
    }
}

/// Snowball stemmers keyed by language tag.
pub struct WordStemmer {
    stemmers: HashMap<&'static str, Stemmer>,
}

impl Default for WordStemmer {
    fn default() -> Self {
        let stemmers = LANGUAGES
            .iter()
            .map(|(lang, algorithm)| (*lang, Stemmer::create(*algorithm)))
            .collect();
        WordStemmer { stemmers }
    }
}

const LANGUAGES: &[(&str, Algorithm)] = &[
    ("ar", Algorithm::Arabic),
    ("da", Algorithm::Danish),
    ("de", Algorithm::German),
    ("en", Algorithm::English),
    ("es", Algorithm::Spanish),
    ("fi", Algorithm::Finnish),
    ("fr", Algorithm::French),
    ("hu", Algorithm::Hungarian),
    ("it", Algorithm::Italian),
    ("nl", Algorithm::Dutch),
    ("no", Algorithm::Norwegian),
    ("pt", Algorithm::Portuguese),
    ("ro", Algorithm::Romanian),
    ("ru", Algorithm::Russian),
    ("sv", Algorithm::Swedish),
    ("tr", Algorithm::Turkish),
];

impl WordStemmer {
    pub fn supports(&self, lang: &str) -> bool {
        self.stemmers.contains_key(lang)
    }

    /// Stem a single word.
    ///
    /// Acronyms are kept as written; in English a plural acronym (`APIs`) drops its `s`.
    /// Languages without a stemmer only get lower-cased.
    pub fn stem_word(&self, word: &str, lang: &str) -> String {
        if is_acronym(word) {
            return word.to_string();
        }
        if lang == "en" {
            if let Some(singular) = word.strip_suffix('s').filter(|w| is_acronym(w)) {
                return singular.to_string();
            }
        }
        let lower = word.to_lowercase();
        match self.stemmers.get(lang) {
            Some(stemmer) => stemmer.stem(&lower).into_owned(),
            None => lower,
        }
    }

    pub fn terms(&self, text: &str, lang: &str) -> Terms {
        let words = tokenize(text);
        Terms {
            normalized: words.iter().map(|w| w.to_lowercase()).collect::<Vec<_>>().join(" "),
            stems: words.iter().map(|w| self.stem_word(w, lang)).collect(),
        }
    }
}

pub fn tokenize(text: &str) -> Vec<&str> {
    WORD.find_iter(text).map(|m| m.as_str()).collect()
}

fn is_acronym(word: &str) -> bool {
    word.chars().any(char::is_uppercase) && !word.chars().any(char::is_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_english_words() {
        let stemmer = WordStemmer::default();
        assert_eq!(stemmer.stem_word("Sets", "en"), "set");
        assert_eq!(stemmer.stem_word("running", "en"), "run");
        assert_eq!(stemmer.stem_word("thing", "en"), "thing");
    }

    #[test]
    fn keeps_acronyms() {
        let stemmer = WordStemmer::default();
        assert_eq!(stemmer.stem_word("NP", "en"), "NP");
        assert_eq!(stemmer.stem_word("APIs", "en"), "API");
        assert_eq!(stemmer.stem_word("APIs", "xx"), "apis");
    }

    #[test]
    fn unsupported_language_lowercases() {
        let stemmer = WordStemmer::default();
        assert!(!stemmer.supports("xx"));
        assert_eq!(stemmer.stem_word("Mengen", "xx"), "mengen");
    }

    #[test]
    fn phrase_terms() {
        let stemmer = WordStemmer::default();
        let terms = stemmer.terms("Foo  Thing", "en");
        assert_eq!(terms.normalized, "foo thing");
        assert_eq!(terms.stems, ["foo", "thing"]);
        assert!(terms.contains_all(&stemmer.terms("foo", "en")));
        assert!(!terms.contains_all(&stemmer.terms("bar", "en")));
        assert_eq!(tokenize("natural-number's"), ["natural", "number", "s"]);
    }
}
