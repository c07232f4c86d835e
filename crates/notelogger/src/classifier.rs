//! One-time-passcode detection.
//!
//! The detector runs a fixed, ordered list of patterns over notification
//! text. Only the first match of each pattern is considered, and the first
//! pattern whose match survives the false-positive check wins. Later
//! patterns are never consulted once a code is accepted, even if they would
//! produce a "better" code.

use regex::Regex;
use tracing::trace;

/// Shortest accepted code length.
const MIN_CODE_LEN: usize = 4;

/// Longest accepted code length.
const MAX_CODE_LEN: usize = 8;

/// Words whose presence anywhere in the text marks digit runs as phone
/// numbers rather than passcodes.
const FALSE_POSITIVE_WORDS: &[&str] = &["phone", "call"];

/// Result of running the detector over a piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtpMatch {
    code: Option<String>,
    pattern: Option<&'static str>,
}

impl OtpMatch {
    /// A result carrying no code.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    fn found(code: &str, pattern: &'static str) -> Self {
        Self {
            code: Some(code.to_string()),
            pattern: Some(pattern),
        }
    }

    /// Whether a code was detected.
    #[must_use]
    pub fn is_otp(&self) -> bool {
        self.code.is_some()
    }

    /// The detected code.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Name of the pattern that produced the code.
    #[must_use]
    pub fn pattern(&self) -> Option<&'static str> {
        self.pattern
    }

    /// Consume the match, returning the code.
    #[must_use]
    pub fn into_code(self) -> Option<String> {
        self.code
    }
}

/// A compiled OTP pattern.
#[derive(Debug)]
pub struct OtpPattern {
    /// Name of the pattern for identification.
    pub name: &'static str,

    /// The compiled regex.
    regex: Regex,
}

impl OtpPattern {
    /// Create a new OTP pattern.
    ///
    /// # Panics
    ///
    /// Panics if the regex pattern is invalid.
    #[must_use]
    pub fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("Invalid regex pattern"),
        }
    }

    /// Extract the candidate code from the first match in `text`.
    ///
    /// Uses capture group 1 when the pattern defines one, the whole match
    /// otherwise.
    #[must_use]
    pub fn candidate<'a>(&self, text: &'a str) -> Option<&'a str> {
        let caps = self.regex.captures(text)?;
        caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
    }
}

/// Get the built-in OTP patterns in priority order.
#[must_use]
pub fn builtin_patterns() -> Vec<OtpPattern> {
    vec![
        OtpPattern::new("four_digit", r"\b[0-9]{4}\b"),
        OtpPattern::new("six_digit", r"\b[0-9]{6}\b"),
        OtpPattern::new("eight_digit", r"\b[0-9]{8}\b"),
        OtpPattern::new("keyword_then_code", r"(?:OTP|otp|code|Code).*?([0-9]{4,8})"),
        OtpPattern::new("code_then_keyword", r"([0-9]{4,8}).*?(?:OTP|otp|code|Code)"),
    ]
}

/// Detects one-time passcodes in notification text.
#[derive(Debug)]
pub struct OtpDetector {
    patterns: Vec<OtpPattern>,
}

impl OtpDetector {
    /// Create a detector using the built-in patterns.
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: builtin_patterns(),
        }
    }

    /// Run detection over `text`.
    #[must_use]
    pub fn detect(&self, text: Option<&str>) -> OtpMatch {
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return OtpMatch::none();
        };

        for pattern in &self.patterns {
            let Some(code) = pattern.candidate(text) else {
                continue;
            };
            if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&code.len()) {
                trace!(pattern = pattern.name, "Candidate length out of range");
                continue;
            }
            if is_false_positive(code, text) {
                trace!(pattern = pattern.name, "Candidate rejected as false positive");
                continue;
            }
            trace!(pattern = pattern.name, "OTP detected");
            return OtpMatch::found(code, pattern.name);
        }

        OtpMatch::none()
    }
}

impl Default for OtpDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn is_false_positive(code: &str, text: &str) -> bool {
    let lower = text.to_lowercase();
    if FALSE_POSITIVE_WORDS.iter().any(|w| lower.contains(w)) {
        return true;
    }
    let mut chars = code.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => true,
    }
}
