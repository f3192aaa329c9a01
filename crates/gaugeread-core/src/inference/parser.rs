//! Layered answer parser.
//!
//! Model output is free text. Extractors are tried in order, strictest
//! first, and the first one that yields a value with a unit wins:
//!
//! 1. [`StructuredTail`]: the last `Answer: <number> <unit>` line.
//! 2. [`Permissive`]: "final answer", "reading is" and "approximately"
//!    phrasings.
//! 3. [`CalculateScan`]: the last number followed by a known unit after the
//!    last "Calculate" mention, or anywhere in the text.
//!
//! A structured or final-answer match that has a number but no unit borrows
//! the scale hint's unit. When nothing matches, the reading is a parse
//! failure carrying the full text.

use crate::types::{FailureKind, Reading, ScaleHint};
use crate::units::UnitTable;
use regex::{Captures, Regex};
use std::sync::LazyLock;

// -- Number and unit building blocks --
// Optional sign, then comma-grouped, plain or leading-dot decimals.
const NUM: &str = r"(?P<sign>[-−])?(?P<digits>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?|\.\d+)";
const UNIT: &str = r"(?P<unit>[°º]\s?[CFcf]\b|[A-Za-zµμΩω°º%][A-Za-zµμΩω°º%/²³0-9]*)";
const HEDGE: &str = r"(?:(?:approximately|approx\.?|about|around|roughly|~|≈)\s*)?";

static RE_ANSWER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?im)^[\s>*_#-]*(?:final\s+)?answer\s*[*_]*\s*[:：=]\s*[*_`]*\s*{HEDGE}{NUM}(?P<rest>[^\n]*)$"
    ))
    .expect("valid answer line regex")
});
static RE_FINAL_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bfinal\s+(?:answer|reading|value)\s*(?:is|=|:)?\s*[*_]*\s*{HEDGE}{NUM}(?P<rest>[^\n]*)"
    ))
    .expect("valid final phrase regex")
});
static RE_READING_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\breading\s*(?:is|of|=|:)\s*[*_]*\s*{HEDGE}{NUM}(?P<rest>[^\n]*)"
    ))
    .expect("valid reading phrase regex")
});
static RE_APPROXIMATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:approximately|around|about|roughly)\s+{NUM}(?P<rest>[^\n]*)"
    ))
    .expect("valid approximate regex")
});
static RE_CALCULATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)calculat").expect("valid calculate regex"));
static RE_NUMBER_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{NUM}\s*{UNIT}")).expect("valid number unit regex")
});
static RE_CONFIDENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)confidence(?:\s+level)?\s*[*_]*\s*[:：=]\s*[*_]*\s*(?P<num>\d+(?:\.\d+)?|\.\d+)\s*(?P<pct>%)?",
    )
    .expect("valid confidence regex")
});

/// A value found by an extractor, before unit repair.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub value: f64,
    /// Canonical unit, if the text stated one
    pub unit: Option<String>,
    /// Whether a missing unit may be filled from the scale hint
    pub repairable: bool,
}

/// One layer of the parser.
pub trait Extractor: Send + Sync {
    /// Tag recorded on readings this layer produces.
    fn name(&self) -> &'static str;

    fn extract(&self, text: &str, units: &UnitTable) -> Option<Candidate>;
}

/// The last `Answer: <number> <unit>` line.
pub struct StructuredTail;

impl Extractor for StructuredTail {
    fn name(&self) -> &'static str {
        "structured_tail"
    }

    fn extract(&self, text: &str, units: &UnitTable) -> Option<Candidate> {
        RE_ANSWER_LINE
            .captures_iter(text)
            .filter_map(|caps| {
                let value = number_from(&caps, text)?;
                let rest = caps.name("rest").map_or("", |m| m.as_str());
                Some(Candidate {
                    value,
                    unit: unit_from_rest(rest, units, true),
                    repairable: true,
                })
            })
            .last()
    }
}

/// Looser phrasings, strongest first.
pub struct Permissive;

impl Extractor for Permissive {
    fn name(&self) -> &'static str {
        "permissive"
    }

    fn extract(&self, text: &str, units: &UnitTable) -> Option<Candidate> {
        // "about 2 ticks past 40" must not be read as 2 of the hinted unit,
        // so only the explicit phrasings may borrow a unit.
        let phrasings: [(&Regex, bool); 3] = [
            (&*RE_FINAL_PHRASE, true),
            (&*RE_READING_PHRASE, true),
            (&*RE_APPROXIMATE, false),
        ];

        phrasings.into_iter().find_map(|(re, repairable)| {
            re.captures_iter(text)
                .filter_map(|caps| {
                    let value = number_from(&caps, text)?;
                    let rest = caps.name("rest").map_or("", |m| m.as_str());
                    let unit = unit_from_rest(rest, units, false);
                    (unit.is_some() || repairable).then_some(Candidate {
                        value,
                        unit,
                        repairable,
                    })
                })
                .last()
        })
    }
}

/// Last number with a known unit, preferring the calculation step.
pub struct CalculateScan;

impl CalculateScan {
    fn last_known(text: &str, units: &UnitTable) -> Option<Candidate> {
        RE_NUMBER_UNIT
            .captures_iter(text)
            .filter_map(|caps| {
                let unit = caps.name("unit")?.as_str();
                if !units.is_known(unit) {
                    return None;
                }
                Some(Candidate {
                    value: number_from(&caps, text)?,
                    unit: Some(units.normalize(unit)),
                    repairable: false,
                })
            })
            .last()
    }
}

impl Extractor for CalculateScan {
    fn name(&self) -> &'static str {
        "calculate_scan"
    }

    fn extract(&self, text: &str, units: &UnitTable) -> Option<Candidate> {
        let after_calculate = RE_CALCULATE
            .find_iter(text)
            .last()
            .map(|m| &text[m.end()..]);

        after_calculate
            .and_then(|tail| Self::last_known(tail, units))
            .or_else(|| Self::last_known(text, units))
    }
}

/// Turns model output into a [`Reading`].
pub struct AnswerParser {
    extractors: Vec<Box<dyn Extractor>>,
    units: UnitTable,
}

impl AnswerParser {
    /// The default three-layer chain.
    pub fn new(units: UnitTable) -> Self {
        Self::with_extractors(
            units,
            vec![
                Box::new(StructuredTail),
                Box::new(Permissive),
                Box::new(CalculateScan),
            ],
        )
    }

    pub fn with_extractors(units: UnitTable, extractors: Vec<Box<dyn Extractor>>) -> Self {
        Self { extractors, units }
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    /// Parse `text`, falling back through the extractor chain.
    pub fn parse(&self, text: &str, scale_hint: Option<&ScaleHint>) -> Reading {
        let hint_unit = scale_hint
            .and_then(|h| h.unit.as_deref())
            .map(str::trim)
            .filter(|u| !u.is_empty());
        let confidence = parse_confidence(text);

        for extractor in &self.extractors {
            let Some(candidate) = extractor.extract(text, &self.units) else {
                continue;
            };
            match (candidate.unit, hint_unit) {
                (Some(unit), _) => {
                    return Reading::parsed(
                        candidate.value,
                        unit,
                        confidence,
                        text,
                        extractor.name(),
                    );
                }
                (None, Some(hint)) if candidate.repairable => {
                    tracing::debug!(
                        "{} found {} without a unit, using hint unit {hint}",
                        extractor.name(),
                        candidate.value
                    );
                    let tag = format!("{}+hint_unit", extractor.name());
                    return Reading::parsed(
                        candidate.value,
                        self.units.normalize(hint),
                        confidence,
                        text,
                        &tag,
                    );
                }
                _ => continue,
            }
        }

        Reading::failed(FailureKind::ParseFailure, text)
    }
}

/// Signed value of a `NUM` match. A minus sign directly after a letter or
/// digit is a range hyphen ("0-100"), not a sign.
fn number_from(caps: &Captures<'_>, haystack: &str) -> Option<f64> {
    let digits = caps.name("digits")?.as_str().replace(',', "");
    let value: f64 = digits.parse().ok()?;
    let negative = caps.name("sign").is_some_and(|sign| {
        !haystack[..sign.start()]
            .chars()
            .next_back()
            .is_some_and(char::is_alphanumeric)
    });
    Some(if negative { -value } else { value })
}

/// Unit stated in the text following a number.
///
/// Tries the whole phrase up to the first separator, then the first two
/// words, then the first word. Unknown words are accepted only when
/// `allow_unknown` is set.
fn unit_from_rest(rest: &str, units: &UnitTable, allow_unknown: bool) -> Option<String> {
    let rest = rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '`' | '('));
    let phrase = rest
        .split(|c: char| matches!(c, ',' | ';' | '(' | ')' | '*' | '`' | '|'))
        .next()
        .unwrap_or("")
        .trim()
        .trim_end_matches(['.', '!', '?', ':'])
        .trim();
    if phrase.is_empty() {
        return None;
    }
    if units.is_known(phrase) {
        return Some(units.normalize(phrase));
    }

    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.len() >= 2 {
        let pair = format!("{} {}", words[0], words[1]);
        if units.is_known(&pair) {
            return Some(units.normalize(&pair));
        }
    }

    let first = words.first()?.trim_end_matches(['.', '!', '?', ':']);
    if units.is_known(first) {
        return Some(units.normalize(first));
    }
    let looks_like_unit = first
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || matches!(c, '°' | 'º' | '%'));
    (allow_unknown && looks_like_unit).then(|| units.normalize(first))
}

/// Self-reported confidence, as a fraction. Percentages are scaled down.
fn parse_confidence(text: &str) -> Option<f64> {
    let caps = RE_CONFIDENCE.captures_iter(text).last()?;
    let value: f64 = caps.name("num")?.as_str().parse().ok()?;
    if caps.name("pct").is_some() || (value > 1.0 && value <= 100.0) {
        Some(value / 100.0)
    } else {
        Some(value)
    }
}
