//! Unit synonym table.
//!
//! Maps the many spellings a model produces ("PSI", "deg C", "volts") to one
//! canonical unit string. Lookups ignore whitespace and, except where an SI
//! prefix letter changes the meaning (`mPa` vs `MPa`), case. Units with no
//! entry pass through trimmed and unchanged, so the table never invents a
//! conversion: "bar" and "psi" stay distinct units.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Built-in synonyms: (canonical, spellings).
const DEFAULT_SYNONYMS: &[(&str, &[&str])] = &[
    // Pressure
    ("psi", &["psi", "psig", "lb/in2", "lb/in²", "lbf/in2", "lbf/in²"]),
    ("bar", &["bar", "bars"]),
    ("mbar", &["mbar", "millibar", "millibars"]),
    ("Pa", &["pa", "pascal", "pascals"]),
    ("kPa", &["kpa", "kilopascal", "kilopascals"]),
    ("MPa", &["mpa", "megapascal", "megapascals"]),
    ("atm", &["atm", "atmosphere", "atmospheres"]),
    ("mmHg", &["mmhg"]),
    ("inHg", &["inhg"]),
    ("kgf/cm²", &["kgf/cm²", "kg/cm²", "kg/cm2"]),
    // Temperature
    ("°C", &["°c", "ºc", "c", "degc", "celsius", "°celsius", "degreescelsius", "degreesc"]),
    ("°F", &["°f", "ºf", "f", "degf", "fahrenheit", "degreesfahrenheit", "degreesf"]),
    ("K", &["kelvin"]),
    // Electrical
    ("V", &["v", "volt", "volts"]),
    ("mV", &["mv", "millivolt", "millivolts"]),
    ("kV", &["kv", "kilovolt", "kilovolts"]),
    ("A", &["a", "amp", "amps", "ampere", "amperes"]),
    ("mA", &["ma", "milliamp", "milliamps", "milliampere", "milliamperes"]),
    ("µA", &["µa", "μa", "ua", "microamp", "microamps", "microampere", "microamperes"]),
    ("Ω", &["ω", "ohm", "ohms"]),
    ("kΩ", &["kω", "kohm", "kohms", "kiloohm", "kiloohms"]),
    ("W", &["w", "watt", "watts"]),
    ("kW", &["kw", "kilowatt", "kilowatts"]),
    ("Hz", &["hz", "hertz"]),
    // Volume
    ("ml", &["ml", "milliliter", "milliliters", "millilitre", "millilitres", "cc", "cm³", "cm3"]),
    ("l", &["l", "liter", "liters", "litre", "litres"]),
    // Length
    ("mm", &["mm", "millimeter", "millimeters", "millimetre", "millimetres"]),
    ("cm", &["cm", "centimeter", "centimeters", "centimetre", "centimetres"]),
    ("m", &["m", "meter", "meters", "metre", "metres"]),
    ("inch", &["inch", "inches"]),
    // Mass
    ("g", &["g", "gram", "grams"]),
    ("kg", &["kg", "kilogram", "kilograms"]),
    ("lb", &["lb", "lbs", "pound", "pounds"]),
    // Other
    ("%", &["%", "percent", "pct"]),
    ("rpm", &["rpm", "r/min"]),
    ("km/h", &["km/h", "kmh", "kph"]),
    ("mph", &["mph"]),
];

/// Units that differ from another unit only by the case of the prefix
/// (milli vs mega). These match only when spelled with exact case.
const CASE_SENSITIVE: &[&str] = &["mPa", "MPa", "mA", "MA", "mV", "MV", "mW", "MW", "mΩ", "MΩ"];

/// Whitespace-insensitive unit synonym lookup.
#[derive(Debug, Clone)]
pub struct UnitTable {
    /// Case-preserved spelling -> canonical
    exact: HashMap<String, String>,
    /// Case-folded spelling -> canonical
    folded: HashMap<String, String>,
    /// Folded keys that must not fall back to a case-insensitive match
    case_sensitive: HashSet<String>,
}

impl Default for UnitTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for (canonical, spellings) in DEFAULT_SYNONYMS {
            table.exact.insert(strip(canonical), canonical.to_string());
            table.folded.insert(fold(canonical), canonical.to_string());
            for spelling in *spellings {
                table.folded.insert(fold(spelling), canonical.to_string());
            }
        }
        for unit in CASE_SENSITIVE {
            table
                .exact
                .entry(strip(unit))
                .or_insert_with(|| unit.to_string());
            table.case_sensitive.insert(fold(unit));
        }
        table
    }
}

impl UnitTable {
    /// An empty table: every unit passes through unchanged.
    pub fn empty() -> Self {
        Self {
            exact: HashMap::new(),
            folded: HashMap::new(),
            case_sensitive: HashSet::new(),
        }
    }

    /// Add or replace synonyms. Overrides win over built-in entries, and an
    /// overridden spelling matches in any case.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (spelling, canonical) in overrides {
            let canonical = canonical.trim();
            self.insert(canonical, canonical);
            self.insert(spelling, canonical);
            self.case_sensitive.remove(&fold(spelling));
        }
        self
    }

    /// Canonical spelling of `unit`, or the trimmed input if unknown.
    pub fn normalize(&self, unit: &str) -> String {
        let trimmed = unit.trim().trim_end_matches('.');
        self.lookup(trimmed)
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string())
    }

    /// Whether `unit` has an entry in the table.
    pub fn is_known(&self, unit: &str) -> bool {
        self.lookup(unit.trim().trim_end_matches('.')).is_some()
    }

    /// Whether two units are the same after normalization.
    pub fn same_unit(&self, a: &str, b: &str) -> bool {
        let a = self.normalize(a);
        let b = self.normalize(b);
        !a.is_empty() && a == b
    }

    /// Register `spelling` under both exact and folded lookup.
    fn insert(&mut self, spelling: &str, canonical: &str) {
        self.exact.insert(strip(spelling), canonical.to_string());
        self.folded.insert(fold(spelling), canonical.to_string());
    }

    fn lookup(&self, unit: &str) -> Option<&str> {
        if let Some(canonical) = self.exact.get(&strip(unit)) {
            return Some(canonical.as_str());
        }
        let key = fold(unit);
        if self.case_sensitive.contains(&key) {
            return None;
        }
        self.folded.get(&key).map(String::as_str)
    }
}

fn strip(unit: &str) -> String {
    unit.chars().filter(|c| !c.is_whitespace()).collect()
}

fn fold(unit: &str) -> String {
    unit.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
