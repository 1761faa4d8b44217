//! Confidence scoring for extracted fields.
//!
//! Combines the model's self-reported confidence with a rule-based heuristic
//! score, and flags fields below the review threshold. The heuristic rules
//! are fixed and individually testable.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

use crate::config::ConfidenceSettings;

/// Expected shape of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Date,
    Number,
    Email,
    Text,
}

impl FieldType {
    /// Infer the field type from a field name and its value.
    pub fn infer(field_name: &str, value: &Value) -> Self {
        let lower = field_name.to_lowercase();
        if lower.contains("date") {
            return Self::Date;
        }
        if lower.contains("email") {
            return Self::Email;
        }
        if value.is_number() || amount_name_re().is_match(&lower) {
            return Self::Number;
        }
        Self::Text
    }
}

/// Score breakdown for one field.
#[derive(Debug, Clone)]
pub struct FieldScore {
    /// Weighted blend of heuristic and model confidence, in [0, 1].
    pub combined: f64,
    pub heuristic: f64,
    pub model: Option<f64>,
    pub needs_review: bool,
    pub reasons: Vec<String>,
}

/// Rule-based confidence scorer.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    heuristic_weight: f64,
    model_weight: f64,
    threshold: f64,
}

fn amount_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"amount|price|total|balance|debit|credit").unwrap())
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap())
}

fn date_shape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{1,2}[-/]\d{1,2}[-/]\d{2,4}").unwrap())
}

fn numeric_shape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\d,.\s$€£¥]+$").unwrap())
}

fn account_shape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9\s-]+$").unwrap())
}

const COMMON_DATE_FORMATS: &[&str] = &["%d-%b-%Y", "%d/%m/%Y", "%m/%d/%Y", "%Y-%m-%d"];

impl ConfidenceScorer {
    /// Build a scorer from settings, renormalizing weights that do not sum
    /// to 1.
    pub fn new(settings: &ConfidenceSettings) -> Self {
        let mut heuristic_weight = settings.heuristic_weight;
        let mut model_weight = settings.llm_weight;
        let total = heuristic_weight + model_weight;
        if (total - 1.0).abs() > 0.01 && total > 0.0 {
            tracing::warn!("Confidence weights don't sum to 1.0 ({}), normalizing", total);
            heuristic_weight /= total;
            model_weight /= total;
        }
        Self {
            heuristic_weight,
            model_weight,
            threshold: settings.threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The normalized (heuristic, model) weight pair.
    pub fn weights(&self) -> (f64, f64) {
        (self.heuristic_weight, self.model_weight)
    }

    /// Score one field.
    pub fn score(
        &self,
        field_name: &str,
        value: &Value,
        field_type: FieldType,
        model_confidence: Option<f64>,
        context: Option<&HashMap<String, String>>,
    ) -> FieldScore {
        let (heuristic, mut reasons) = self.heuristic_confidence(field_name, value, field_type, context);

        let model = model_confidence.map(|c| c.clamp(0.0, 1.0));

        let combined = match model {
            Some(m) => self.heuristic_weight * heuristic + self.model_weight * m,
            None => heuristic,
        }
        .clamp(0.0, 1.0);

        if let Some(m) = model {
            reasons.push(format!("Model confidence: {:.2}", m));
        }

        let needs_review = combined < self.threshold;
        if needs_review {
            reasons.push(format!("Below threshold ({:.2})", self.threshold));
        }

        FieldScore {
            combined,
            heuristic,
            model,
            needs_review,
            reasons,
        }
    }

    /// Heuristic confidence: 0.4 type validity + 0.3 field-name validity +
    /// 0.3 contextual consistency.
    fn heuristic_confidence(
        &self,
        field_name: &str,
        value: &Value,
        field_type: FieldType,
        context: Option<&HashMap<String, String>>,
    ) -> (f64, Vec<String>) {
        let mut reasons = Vec::new();

        if value.is_null() || matches!(value, Value::String(s) if s.trim().is_empty()) {
            return (0.0, vec!["Field is empty or null".to_string()]);
        }

        let (type_conf, type_reason) = match field_type {
            FieldType::Date => validate_date(value),
            FieldType::Number => validate_number(value),
            FieldType::Email => validate_email(value),
            FieldType::Text => validate_text(value),
        };
        reasons.push(type_reason);

        let (field_conf, field_reason) = validate_field_specific(field_name, value);
        if let Some(reason) = field_reason {
            reasons.push(reason);
        }

        let (ctx_conf, ctx_reason) = check_context_consistency(field_name, value, context);
        if let Some(reason) = ctx_reason {
            reasons.push(reason);
        }

        let confidence = (0.4 * type_conf + 0.3 * field_conf + 0.3 * ctx_conf).clamp(0.0, 1.0);
        (confidence, reasons)
    }

    /// Overall document confidence: mean of field-object confidences, with
    /// optional path-keyed weights.
    pub fn overall_confidence(
        &self,
        tree: &Value,
        weights: Option<&HashMap<String, f64>>,
    ) -> f64 {
        let mut scores = Vec::new();
        collect_field_confidences(tree, "", &mut scores);

        if scores.is_empty() {
            return 0.0;
        }

        match weights {
            None => scores.iter().map(|(_, c)| c).sum::<f64>() / scores.len() as f64,
            Some(weights) => {
                let mut weighted = 0.0;
                let mut total = 0.0;
                for (path, confidence) in &scores {
                    let w = weights.get(path).copied().unwrap_or(1.0);
                    weighted += confidence * w;
                    total += w;
                }
                if total == 0.0 {
                    0.0
                } else {
                    weighted / total
                }
            }
        }
    }

    /// Field-object paths whose combined confidence is below the threshold.
    pub fn fields_below_threshold(&self, tree: &Value) -> Vec<String> {
        let mut scores = Vec::new();
        collect_field_confidences(tree, "", &mut scores);
        scores
            .into_iter()
            .filter(|(_, c)| *c < self.threshold)
            .map(|(path, _)| path)
            .collect()
    }
}

/// Gather `(path, confidence)` for every field object in the tree.
fn collect_field_confidences(node: &Value, path: &str, out: &mut Vec<(String, f64)>) {
    match node {
        Value::Object(map) => {
            if map.contains_key("value") {
                if let Some(c) = map.get("confidence").and_then(Value::as_f64) {
                    out.push((path.to_string(), c));
                }
                return;
            }
            for (key, value) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                collect_field_confidences(value, &child, out);
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                collect_field_confidences(item, &format!("{}[{}]", path, idx), out);
            }
        }
        _ => {}
    }
}

fn validate_date(value: &Value) -> (f64, String) {
    let Value::String(s) = value else {
        return (0.3, "Date is not a string".to_string());
    };

    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return (1.0, "Valid ISO 8601 date format".to_string());
    }

    for fmt in COMMON_DATE_FORMATS {
        if NaiveDate::parse_from_str(s, fmt).is_ok() {
            return (0.7, format!("Valid date in format {}", fmt));
        }
    }

    if date_shape_re().is_match(s) {
        return (0.4, "Looks like a date but format unclear".to_string());
    }

    (0.2, "Does not appear to be a valid date".to_string())
}

fn validate_number(value: &Value) -> (f64, String) {
    if value.is_number() {
        return (1.0, "Valid numeric type".to_string());
    }

    if let Value::String(s) = value {
        let cleaned: String = s
            .chars()
            .filter(|c| *c != ',' && *c != '$' && !c.is_whitespace())
            .collect();
        if cleaned.parse::<f64>().is_ok() {
            return (0.9, "Valid numeric string".to_string());
        }
        if numeric_shape_re().is_match(s) {
            return (0.6, "Looks numeric but parsing failed".to_string());
        }
    }

    (0.2, "Does not appear to be a number".to_string())
}

fn validate_email(value: &Value) -> (f64, String) {
    let Value::String(s) = value else {
        return (0.0, "Email is not a string".to_string());
    };
    if email_re().is_match(s) {
        return (1.0, "Valid email format".to_string());
    }
    if s.contains('@') && s.contains('.') {
        return (0.5, "Looks like email but format invalid".to_string());
    }
    (0.1, "Does not appear to be an email".to_string())
}

fn validate_text(value: &Value) -> (f64, String) {
    match value {
        Value::String(s) if !s.trim().is_empty() => (0.8, "Non-empty string".to_string()),
        Value::String(_) => (0.3, "Empty or whitespace-only string".to_string()),
        _ => (0.5, "Not a string type".to_string()),
    }
}

fn validate_field_specific(field_name: &str, value: &Value) -> (f64, Option<String>) {
    let lower = field_name.to_lowercase();

    if lower.contains("account") && lower.contains("number") {
        if let Value::String(s) = value {
            if account_shape_re().is_match(&s.to_uppercase()) {
                let len = s.chars().filter(|c| *c != ' ' && *c != '-').count();
                if (8..=20).contains(&len) {
                    return (0.9, Some("Valid account number format".to_string()));
                }
                return (0.6, Some("Account number length unusual".to_string()));
            }
        }
        return (0.4, Some("Account number format invalid".to_string()));
    }

    if lower.contains("currency") {
        if let Value::String(s) = value {
            const KNOWN: &[&str] = &[
                "USD", "EUR", "GBP", "JPY", "CNY", "INR", "BDT", "AUD", "CAD",
            ];
            if KNOWN.contains(&s.to_uppercase().as_str()) {
                return (1.0, Some("Valid currency code".to_string()));
            }
            if s.len() == 3 && s.chars().all(|c| c.is_alphabetic()) {
                return (0.7, Some("Looks like currency code".to_string()));
            }
        }
        return (0.3, Some("Invalid currency format".to_string()));
    }

    (0.5, None)
}

fn check_context_consistency(
    field_name: &str,
    value: &Value,
    context: Option<&HashMap<String, String>>,
) -> (f64, Option<String>) {
    let Some(context) = context else {
        return (0.5, None);
    };
    let lower = field_name.to_lowercase();

    if lower.contains("currency") {
        if let Some(doc_currency) = context.get("document_currency") {
            let matches = value
                .as_str()
                .is_some_and(|s| s.eq_ignore_ascii_case(doc_currency));
            return if matches {
                (0.8, Some("Currency matches document currency".to_string()))
            } else {
                (0.4, Some("Currency mismatch with document".to_string()))
            };
        }
    }

    if lower.contains("date") {
        if let (Some(prev), Some(current)) = (
            context
                .get("previous_date")
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
            value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
        ) {
            return if current >= prev {
                (0.8, Some("Date is chronologically consistent".to_string()))
            } else {
                (0.5, Some("Date appears out of chronological order".to_string()))
            };
        }
    }

    (0.5, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(&ConfidenceSettings::default())
    }

    #[test]
    fn test_weight_renormalization() {
        let s = ConfidenceScorer::new(&ConfidenceSettings {
            threshold: 0.7,
            heuristic_weight: 3.0,
            llm_weight: 1.0,
        });
        assert!((s.heuristic_weight - 0.75).abs() < 1e-9);
        assert!((s.model_weight - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_field_type_inference() {
        assert_eq!(FieldType::infer("start_date", &json!("2025-01-01")), FieldType::Date);
        assert_eq!(FieldType::infer("email", &json!("a@b.com")), FieldType::Email);
        assert_eq!(FieldType::infer("opening_balance", &json!("1,000")), FieldType::Number);
        assert_eq!(FieldType::infer("notes", &json!(42)), FieldType::Number);
        assert_eq!(FieldType::infer("bank_name", &json!("Example")), FieldType::Text);
    }

    #[test]
    fn test_date_rule_ladder() {
        assert_eq!(validate_date(&json!("2025-01-15")).0, 1.0);
        assert_eq!(validate_date(&json!("15-Jan-2025")).0, 0.7);
        assert_eq!(validate_date(&json!("1/2/25 ish")).0, 0.4);
        assert_eq!(validate_date(&json!("tuesday")).0, 0.2);
    }

    #[test]
    fn test_number_rule_ladder() {
        assert_eq!(validate_number(&json!(1500.0)).0, 1.0);
        assert_eq!(validate_number(&json!("1,500.00")).0, 0.9);
        assert_eq!(validate_number(&json!("1.2.3,")).0, 0.6);
        assert_eq!(validate_number(&json!("hello")).0, 0.2);
    }

    #[test]
    fn test_email_rule_ladder() {
        assert_eq!(validate_email(&json!("a.b@example.com")).0, 1.0);
        assert_eq!(validate_email(&json!("a@b")).0, 0.1);
        assert_eq!(validate_email(&json!("a@ b.com")).0, 0.5);
        assert_eq!(validate_email(&json!(42)).0, 0.0);
    }

    #[test]
    fn test_account_number_rules() {
        let (c, _) = validate_field_specific("account_number", &json!("123456789012"));
        assert_eq!(c, 0.9);
        let (c, _) = validate_field_specific("account_number", &json!("1234"));
        assert_eq!(c, 0.6);
        let (c, _) = validate_field_specific("account_number", &json!("abc!!"));
        assert_eq!(c, 0.4);
    }

    #[test]
    fn test_currency_rules() {
        let (c, _) = validate_field_specific("currency", &json!("USD"));
        assert_eq!(c, 1.0);
        let (c, _) = validate_field_specific("currency", &json!("XTS"));
        assert_eq!(c, 0.7);
        let (c, _) = validate_field_specific("currency", &json!("dollars"));
        assert_eq!(c, 0.3);
    }

    #[test]
    fn test_combined_uses_model_confidence() {
        let s = scorer();
        let with_model = s.score("start_date", &json!("2025-01-01"), FieldType::Date, Some(1.0), None);
        let without = s.score("start_date", &json!("2025-01-01"), FieldType::Date, None, None);
        // heuristic = 0.4*1.0 + 0.3*0.5 + 0.3*0.5 = 0.70
        assert!((without.combined - 0.70).abs() < 1e-9);
        // combined = 0.6*0.70 + 0.4*1.0 = 0.82
        assert!((with_model.combined - 0.82).abs() < 1e-9);
        assert!(!with_model.needs_review);
    }

    #[test]
    fn test_needs_review_flag() {
        let s = scorer();
        let score = s.score("notes", &json!("??"), FieldType::Text, Some(0.2), None);
        assert!(score.needs_review);
        assert!(score.combined < s.threshold());
        assert!(score
            .reasons
            .iter()
            .any(|r| r.contains("Below threshold")));
    }

    #[test]
    fn test_empty_value_scores_zero_heuristic() {
        let s = scorer();
        let score = s.score("description", &json!(""), FieldType::Text, None, None);
        assert_eq!(score.heuristic, 0.0);
        assert_eq!(score.combined, 0.0);
    }

    #[test]
    fn test_confidence_bounds() {
        let s = scorer();
        for (value, ty) in [
            (json!("2025-01-01"), FieldType::Date),
            (json!(99.5), FieldType::Number),
            (json!("x@y.io"), FieldType::Email),
            (json!("text"), FieldType::Text),
        ] {
            for model in [None, Some(0.0), Some(0.5), Some(1.0), Some(2.0)] {
                let score = s.score("field", &value, ty, model, None);
                assert!((0.0..=1.0).contains(&score.combined));
                assert!((0.0..=1.0).contains(&score.heuristic));
            }
        }
    }

    #[test]
    fn test_overall_confidence_equal_weights() {
        let tree = json!({
            "a": {"value": "x", "confidence": 0.8},
            "b": {"value": "y", "confidence": 0.6},
            "list": [{"c": {"value": "z", "confidence": 1.0}}]
        });
        let overall = scorer().overall_confidence(&tree, None);
        assert!((overall - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_overall_confidence_weighted() {
        let tree = json!({
            "a": {"value": "x", "confidence": 1.0},
            "b": {"value": "y", "confidence": 0.0}
        });
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 3.0);
        weights.insert("b".to_string(), 1.0);
        let overall = scorer().overall_confidence(&tree, Some(&weights));
        assert!((overall - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_overall_confidence_empty_tree() {
        assert_eq!(scorer().overall_confidence(&json!({}), None), 0.0);
    }

    #[test]
    fn test_fields_below_threshold_paths() {
        let tree = json!({
            "account": {"account_number": {"value": "12", "confidence": 0.5}},
            "bank": {"bank_name": {"value": "Bank", "confidence": 0.95}}
        });
        let flagged = scorer().fields_below_threshold(&tree);
        assert_eq!(flagged, vec!["account.account_number".to_string()]);
    }

    #[test]
    fn test_chronology_context() {
        let mut ctx = HashMap::new();
        ctx.insert("previous_date".to_string(), "2025-01-10".to_string());
        let (c, _) = check_context_consistency("date", &json!("2025-01-12"), Some(&ctx));
        assert_eq!(c, 0.8);
        let (c, _) = check_context_consistency("date", &json!("2025-01-02"), Some(&ctx));
        assert_eq!(c, 0.5);
    }
}
