//! Canonical normalization of extracted data.
//!
//! Three primitives (dates, amounts, currency detection) plus a recursive
//! walk over the extraction tree. The walk is intentionally schema-free:
//! banks vary, so it keys on field-name patterns and the universal
//! `{value, confidence, ...}` field-object shape rather than fixed groups.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

/// Currency symbols mapped to ISO 4217 codes. Multi-character symbols come
/// first so `A$` is not consumed as `$`.
const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("A$", "AUD"),
    ("C$", "CAD"),
    ("R$", "BRL"),
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
    ("৳", "BDT"),
    ("₽", "RUB"),
    ("₨", "PKR"),
];

/// Currency codes recognized in suffix position and free text.
const CURRENCY_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CNY", "INR", "BDT", "AUD", "CAD", "BRL", "RUB", "PKR", "SGD",
    "HKD", "KRW", "MXN", "ZAR", "NZD",
];

/// Date formats probed in order; the first successful parse wins. This is
/// also the documented DD/MM vs MM/DD tie-break: DD/MM is probed first.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d-%b-%Y",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
];

/// Looser formats tried after the fixed probe list.
const PERMISSIVE_FORMATS: &[&str] = &[
    "%d %B %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%d-%m-%Y",
    "%m-%d-%Y",
    "%Y%m%d",
    "%d/%m/%y",
    "%m/%d/%y",
];

fn amount_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"amount|price|total|balance|debit|credit").unwrap())
}

fn pii_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"account|ssn|social|tax|id|passport|credit|card|routing|iban|swift").unwrap()
    })
}

fn date_shape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,4}[-/.]\w{1,3}[-/.]\d{2,4}$").unwrap())
}

fn numeric_fragment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+\.?\d*").unwrap())
}

/// Result of amount normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAmount {
    pub value: f64,
    pub currency: String,
    pub original: String,
}

/// Per-call override of the masking policy.
#[derive(Debug, Clone, Copy)]
pub struct MaskOptions {
    pub mask_char: char,
    pub show_last: usize,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            mask_char: 'X',
            show_last: 4,
        }
    }
}

/// Date, amount, and PII normalization over extraction trees.
#[derive(Debug, Clone)]
pub struct Normalizer {
    mask_pii: bool,
    mask: MaskOptions,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            mask_pii: true,
            mask: MaskOptions::default(),
        }
    }
}

impl Normalizer {
    pub fn new(mask_pii: bool, mask: MaskOptions) -> Self {
        Self { mask_pii, mask }
    }

    /// Normalize a date value to ISO 8601 (`YYYY-MM-DD`), or None.
    ///
    /// Tries the caller's hint format first, then the fixed probe list, then
    /// the permissive formats. First successful parse wins.
    pub fn normalize_date(&self, raw: &str, hint_format: Option<&str>) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(fmt) = hint_format {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
                return Some(date.format("%Y-%m-%d").to_string());
            }
        }

        for fmt in DATE_FORMATS.iter().chain(PERMISSIVE_FORMATS) {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
                return Some(date.format("%Y-%m-%d").to_string());
            }
        }

        warn!("Could not normalize date: {}", raw);
        None
    }

    /// Normalize an amount to a decimal value plus currency.
    ///
    /// Strips one recognized currency symbol, one trailing 3-letter code,
    /// thousands separators and whitespace; falls back to the first numeric
    /// substring when the cleaned string still fails to parse.
    pub fn normalize_amount(&self, raw: &Value, currency_hint: Option<&str>) -> NormalizedAmount {
        let mut result = NormalizedAmount {
            value: 0.0,
            currency: currency_hint.unwrap_or("USD").to_string(),
            original: match raw {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        };

        match raw {
            Value::Number(n) => {
                result.value = n.as_f64().unwrap_or(0.0);
                return result;
            }
            Value::String(s) if !s.trim().is_empty() => {
                let mut amount = s.trim().to_string();

                for (symbol, code) in CURRENCY_SYMBOLS {
                    if amount.contains(symbol) {
                        result.currency = code.to_string();
                        amount = amount.replacen(symbol, "", 1);
                        break;
                    }
                }

                let upper = amount.to_uppercase();
                for code in CURRENCY_CODES {
                    if upper.ends_with(&format!(" {}", code)) {
                        result.currency = code.to_string();
                        amount.truncate(amount.len() - code.len() - 1);
                        break;
                    }
                }

                let cleaned: String = amount
                    .chars()
                    .filter(|c| *c != ',' && !c.is_whitespace())
                    .collect();

                match cleaned.parse::<f64>() {
                    Ok(v) => result.value = v,
                    Err(_) => {
                        if let Some(m) = numeric_fragment_re().find(&cleaned) {
                            if let Ok(v) = m.as_str().parse::<f64>() {
                                result.value = v;
                            }
                        } else {
                            warn!("Could not parse amount: {}", s);
                        }
                    }
                }
            }
            _ => {}
        }

        result
    }

    /// Detect the document currency from free text.
    pub fn detect_currency_in_text(&self, text: &str) -> Option<String> {
        let upper = text.to_uppercase();
        for code in CURRENCY_CODES {
            if upper.contains(code) {
                return Some(code.to_string());
            }
        }
        for (symbol, code) in CURRENCY_SYMBOLS {
            if text.contains(symbol) {
                return Some(code.to_string());
            }
        }
        None
    }

    /// Detect the document currency from the extraction tree.
    ///
    /// Searches recursively for a `currency` leaf holding a known code, then
    /// falls back to scanning the flattened tree text.
    pub fn detect_document_currency(&self, tree: &Value) -> Option<String> {
        fn search(node: &Value) -> Option<String> {
            match node {
                Value::Object(map) => {
                    if let Some(currency) = map.get("currency") {
                        let raw = match currency {
                            Value::Object(inner) => inner.get("value").cloned(),
                            other => Some(other.clone()),
                        };
                        if let Some(Value::String(s)) = raw {
                            let upper = s.to_uppercase();
                            if CURRENCY_CODES.contains(&upper.as_str()) {
                                return Some(upper);
                            }
                        }
                    }
                    map.values().find_map(search)
                }
                Value::Array(items) => items.iter().find_map(search),
                _ => None,
            }
        }

        search(tree).or_else(|| self.detect_currency_in_text(&tree.to_string()))
    }

    /// Mask an account number, preserving the last `show_last` characters.
    ///
    /// Masking operates on the cleaned form (spaces and dashes removed); the
    /// output length equals the cleaned input length.
    pub fn mask_account_number(&self, raw: &str, opts: &MaskOptions) -> String {
        let cleaned: String = raw.chars().filter(|c| *c != ' ' && *c != '-').collect();
        if cleaned.is_empty() {
            return String::new();
        }

        let chars: Vec<char> = cleaned.chars().collect();
        if chars.len() <= opts.show_last {
            // Too short to keep the usual tail; expose only the last char.
            let mut masked: String = std::iter::repeat(opts.mask_char)
                .take(chars.len() - 1)
                .collect();
            masked.push(chars[chars.len() - 1]);
            return masked;
        }

        let keep = chars.len() - opts.show_last;
        let mut masked: String = std::iter::repeat(opts.mask_char).take(keep).collect();
        masked.extend(&chars[keep..]);
        masked
    }

    /// Mask a PII value based on its field name. Only string values are
    /// masked; normalized numeric amounts pass through untouched even when
    /// their key matches a PII pattern (`credit`, ...).
    fn mask_field(&self, key: &str, value: &Value, opts: &MaskOptions) -> Option<Value> {
        let lower = key.to_lowercase();
        if !pii_key_re().is_match(&lower) {
            return None;
        }
        let Value::String(s) = value else {
            return None;
        };
        if s.is_empty() {
            return None;
        }

        if lower.contains("account") && lower.contains("number") {
            return Some(Value::String(self.mask_account_number(s, opts)));
        }

        let chars: Vec<char> = s.chars().collect();
        if chars.len() > opts.show_last {
            let keep = chars.len() - opts.show_last;
            let mut masked: String = std::iter::repeat(opts.mask_char).take(keep).collect();
            masked.extend(&chars[keep..]);
            return Some(Value::String(masked));
        }
        None
    }

    /// Normalize an entire extraction tree: dates, then amounts, then PII
    /// masking. Running the result through again is a no-op.
    pub fn normalize_tree(&self, tree: &Value, mask_override: Option<MaskOptions>) -> Value {
        let currency = self.detect_document_currency(tree);
        let currency = currency.as_deref();

        let normalized = self.normalize_dates(tree, "");
        let normalized = self.normalize_amounts(&normalized, "", currency);

        if self.mask_pii {
            let opts = mask_override.unwrap_or(self.mask);
            self.apply_masking(&normalized, &opts)
        } else {
            normalized
        }
    }

    fn normalize_dates(&self, node: &Value, key: &str) -> Value {
        match node {
            Value::Object(map) => {
                if let Some(Value::String(raw)) = map.get("value") {
                    let date_key = key.to_lowercase().contains("date");
                    let date_shaped = date_shape_re().is_match(raw.trim());
                    if date_key || date_shaped {
                        if let Some(normalized) = self.normalize_date(raw, None) {
                            let mut out = map.clone();
                            out.insert("value".to_string(), Value::String(normalized));
                            return Value::Object(out);
                        }
                        return node.clone();
                    }
                }
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.normalize_dates(v, k));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.normalize_dates(item, key))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn normalize_amounts(&self, node: &Value, key: &str, currency: Option<&str>) -> Value {
        match node {
            Value::Object(map) => {
                if map.contains_key("value") && amount_key_re().is_match(&key.to_lowercase()) {
                    let raw = map.get("value").cloned().unwrap_or(Value::Null);
                    let normalized = self.normalize_amount(&raw, currency);
                    let mut out = map.clone();
                    out.insert(
                        "value".to_string(),
                        serde_json::Number::from_f64(normalized.value)
                            .map(Value::Number)
                            .unwrap_or(Value::Null),
                    );
                    out.insert("currency".to_string(), Value::String(normalized.currency));
                    return Value::Object(out);
                }
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.normalize_amounts(v, k, currency));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.normalize_amounts(item, key, currency))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn apply_masking(&self, node: &Value, opts: &MaskOptions) -> Value {
        match node {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    let masked = match v {
                        Value::Object(inner) if inner.contains_key("value") => {
                            let value = inner.get("value").unwrap();
                            match self.mask_field(k, value, opts) {
                                Some(masked_value) => {
                                    let mut field = inner.clone();
                                    field.insert("value".to_string(), masked_value);
                                    Value::Object(field)
                                }
                                None => self.apply_masking(v, opts),
                            }
                        }
                        Value::Object(_) | Value::Array(_) => self.apply_masking(v, opts),
                        leaf => self.mask_field(k, leaf, opts).unwrap_or_else(|| leaf.clone()),
                    };
                    out.insert(k.clone(), masked);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.apply_masking(item, opts))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
