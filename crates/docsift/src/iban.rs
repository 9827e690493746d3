//! IBAN validation (MOD-97 with diagnostics) and OCR-assisted correction
//! primitives.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Structural shape of a plausible IBAN after normalisation.
static STRUCTURAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2}[0-9]{2}[A-Z0-9]{11,30}$").expect("invalid IBAN structural regex"));

/// Candidate IBAN substrings inside free-form OCR text: country code,
/// check digits, then 18-26 digit/space characters.
static CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2}\s*\d{2}[\s\d]{18,26}\b").expect("invalid IBAN candidate regex"));

/// Countries whose IBANs have a fixed known length in this pipeline's
/// document corpus.
const FIXED_LENGTHS: &[(&str, usize)] = &[("SK", 24), ("CZ", 24)];

/// Validation outcome category for a candidate IBAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IbanIssue {
    Missing,
    Invalid,
    TooShort,
    TooLong,
    ChecksumFailed,
}

impl IbanIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            IbanIssue::Missing => "missing",
            IbanIssue::Invalid => "invalid",
            IbanIssue::TooShort => "too_short",
            IbanIssue::TooLong => "too_long",
            IbanIssue::ChecksumFailed => "checksum_failed",
        }
    }
}

/// Detailed verdict for one candidate string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IbanDiagnosis {
    pub normalized: String,
    pub issue: Option<IbanIssue>,
    /// Human-readable detail for repair prompts and API consumers.
    pub details: Option<String>,
}

impl IbanDiagnosis {
    pub fn is_valid(&self) -> bool {
        self.issue.is_none()
    }
}

/// Remove whitespace and upper-case a candidate string.
pub fn normalize(candidate: &str) -> String {
    candidate
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Validate a candidate IBAN, reporting what is wrong when it fails.
///
/// Checks in order: presence, structural shape, expected length for
/// fixed-length countries, then the MOD-97 checksum.
pub fn diagnose(candidate: &str) -> IbanDiagnosis {
    let normalized = normalize(candidate);
    if normalized.is_empty() {
        return IbanDiagnosis {
            normalized,
            issue: Some(IbanIssue::Missing),
            details: Some("no IBAN present".to_string()),
        };
    }

    if !STRUCTURAL.is_match(&normalized) {
        // Length problems for known countries are more actionable than a
        // generic structural failure, so diagnose those first.
        if let Some(diagnosis) = diagnose_length(&normalized) {
            return diagnosis;
        }
        return IbanDiagnosis {
            normalized,
            issue: Some(IbanIssue::Invalid),
            details: Some("does not match IBAN structure".to_string()),
        };
    }

    if let Some(diagnosis) = diagnose_length(&normalized) {
        return diagnosis;
    }

    if mod97(&normalized) {
        IbanDiagnosis {
            normalized,
            issue: None,
            details: None,
        }
    } else {
        IbanDiagnosis {
            normalized,
            issue: Some(IbanIssue::ChecksumFailed),
            details: Some("MOD-97 checksum failed".to_string()),
        }
    }
}

fn diagnose_length(normalized: &str) -> Option<IbanDiagnosis> {
    let country = normalized.get(..2)?;
    let expected = FIXED_LENGTHS
        .iter()
        .find(|(code, _)| *code == country)
        .map(|(_, len)| *len)?;
    let actual = normalized.len();
    match actual.cmp(&expected) {
        std::cmp::Ordering::Less => Some(IbanDiagnosis {
            normalized: normalized.to_string(),
            issue: Some(IbanIssue::TooShort),
            details: Some(format!("TOO SHORT: missing {} digits (expected {expected}, got {actual})", expected - actual)),
        }),
        std::cmp::Ordering::Greater => Some(IbanDiagnosis {
            normalized: normalized.to_string(),
            issue: Some(IbanIssue::TooLong),
            details: Some(format!("TOO LONG: {} extra (expected {expected}, got {actual})", actual - expected)),
        }),
        std::cmp::Ordering::Equal => None,
    }
}

/// True when an already-normalised candidate passes validation entirely.
pub fn is_valid(candidate: &str) -> bool {
    diagnose(candidate).is_valid()
}

/// MOD-97 checksum over a normalised IBAN.
///
/// Rotates the first four characters to the end, substitutes letters with
/// their numeric codes (A=10 .. Z=35) and checks the resulting decimal
/// number modulo 97. The remainder is folded incrementally so the full
/// (up to ~60 digit) number never has to be materialised.
pub fn mod97(normalized: &str) -> bool {
    let (Some(head), Some(tail)) = (normalized.get(..4), normalized.get(4..)) else {
        return false;
    };
    if tail.is_empty() {
        return false;
    }
    let rotated = format!("{tail}{head}");

    let mut remainder: u32 = 0;
    for c in rotated.chars() {
        let value = match c {
            '0'..='9' => c as u32 - '0' as u32,
            'A'..='Z' => c as u32 - 'A' as u32 + 10,
            _ => return false,
        };
        remainder = if value < 10 {
            (remainder * 10 + value) % 97
        } else {
            (remainder * 100 + value) % 97
        };
    }
    remainder == 1
}

/// Scan free-form OCR text for valid IBAN candidates.
///
/// Matches are normalised and filtered down to those passing MOD-97;
/// duplicates are removed preserving first-seen order.
pub fn scan_candidates(text: &str) -> Vec<String> {
    let mut seen = ahash::AHashSet::new();
    let mut candidates = Vec::new();
    for m in CANDIDATE.find_iter(text) {
        let normalized = normalize(m.as_str());
        if is_valid(&normalized) && seen.insert(normalized.clone()) {
            candidates.push(normalized);
        }
    }
    candidates
}

/// Find the closest valid candidate sharing the country code, within the
/// given Levenshtein distance.
pub fn closest_candidate<'a>(invalid: &str, candidates: &'a [String], max_distance: usize) -> Option<&'a str> {
    let normalized = normalize(invalid);
    let country = normalized.get(..2)?;

    candidates
        .iter()
        .filter(|candidate| candidate.get(..2) == Some(country))
        .map(|candidate| (strsim::levenshtein(&normalized, candidate), candidate))
        .filter(|(distance, _)| *distance <= max_distance)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate.as_str())
}

/// Position-wise character similarity over the account bodies (everything
/// after country code and check digits) of two IBANs.
///
/// Returns 0.0 when either body is empty; otherwise matching positions
/// divided by the longer body length.
pub fn body_similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    let (Some(body_a), Some(body_b)) = (a.get(4..), b.get(4..)) else {
        return 0.0;
    };
    if body_a.is_empty() || body_b.is_empty() {
        return 0.0;
    }
    let longest = body_a.len().max(body_b.len());
    let matches = body_a
        .bytes()
        .zip(body_b.bytes())
        .filter(|(ca, cb)| ca == cb)
        .count();
    matches as f64 / longest as f64
}
