//! Probability scaling for affect predictions
//!
//! The affect detector reports a mix of logits and stepwise-regression outputs.
//! Both are mapped onto [0,1] here before a label is derived. Anomalies are
//! recovered locally and counted in [`AffectDiagnostics`].

use crate::config::CategoryScale;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counters for locally-recovered affect anomalies
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AffectDiagnostics {
    /// Data rows read from the affect table
    pub records_read: usize,
    /// Rows dropped as pre-recording placeholder predictions
    pub idle_filtered: usize,
    /// Rows dropped because the student id is excluded
    pub excluded: usize,
    /// Cells that were not finite numbers and were replaced by 0
    pub unparseable: usize,
    /// Regression outputs clipped up to 0
    pub clipped_low: usize,
    /// Regression outputs clipped down to 1
    pub clipped_high: usize,
    /// Predicted label distribution
    pub label_counts: BTreeMap<String, usize>,
    /// Observed range of each category after scaling
    pub category_ranges: BTreeMap<String, ScaledRange>,
}

impl AffectDiagnostics {
    /// Fold one scaled probability into its category's range
    pub fn record_scaled(&mut self, category: &str, value: f64) {
        match self.category_ranges.get_mut(category) {
            Some(range) => range.include(value),
            None => {
                self.category_ranges
                    .insert(category.to_string(), ScaledRange::new(value));
            }
        }
    }
}

/// Minimum and maximum of a category's scaled probabilities
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaledRange {
    pub min: f64,
    pub max: f64,
}

impl ScaledRange {
    fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Numerically stable logistic function
pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Which bound a clipped value hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clip {
    None,
    Low,
    High,
}

/// Clip a value to [0,1]
pub fn clamp_unit(x: f64) -> (f64, Clip) {
    if x < 0.0 {
        (0.0, Clip::Low)
    } else if x > 1.0 {
        (1.0, Clip::High)
    } else {
        (x, Clip::None)
    }
}

/// Parse a raw cell as a finite number
pub fn parse_finite(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Scale one raw cell onto [0,1], recording anomalies.
///
/// Non-numeric or non-finite cells become 0 regardless of scale.
pub fn scale_cell(cell: &str, scale: CategoryScale, diagnostics: &mut AffectDiagnostics) -> f64 {
    let Some(raw) = parse_finite(cell) else {
        diagnostics.unparseable += 1;
        return 0.0;
    };

    match scale {
        CategoryScale::Logit => logistic(raw),
        CategoryScale::Clip => {
            let (value, clip) = clamp_unit(raw);
            match clip {
                Clip::Low => diagnostics.clipped_low += 1,
                Clip::High => diagnostics.clipped_high += 1,
                Clip::None => {}
            }
            value
        }
    }
}

/// Category with the highest probability; the first category wins ties
pub fn predicted_label(probabilities: &[(String, f64)]) -> Option<&str> {
    let mut best: Option<&(String, f64)> = None;
    for entry in probabilities {
        if best.map_or(true, |(_, p)| entry.1 > *p) {
            best = Some(entry);
        }
    }
    best.map(|(name, _)| name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logistic() {
        assert!((logistic(0.0) - 0.5).abs() < 1e-12);
        assert!((logistic(2.0) - 0.880_797).abs() < 1e-6);
        assert!((logistic(-2.0) - 0.119_203).abs() < 1e-6);
        // No overflow to NaN at the extremes
        assert_eq!(logistic(1000.0), 1.0);
        assert_eq!(logistic(-1000.0), 0.0);
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.2), (0.0, Clip::Low));
        assert_eq!(clamp_unit(1.3), (1.0, Clip::High));
        assert_eq!(clamp_unit(0.4), (0.4, Clip::None));
    }

    #[test]
    fn test_scale_cell_counts_anomalies() {
        let mut diagnostics = AffectDiagnostics::default();

        assert_eq!(scale_cell("abc", CategoryScale::Logit, &mut diagnostics), 0.0);
        assert_eq!(scale_cell("inf", CategoryScale::Logit, &mut diagnostics), 0.0);
        assert_eq!(scale_cell("NaN", CategoryScale::Clip, &mut diagnostics), 0.0);
        assert_eq!(scale_cell("-0.5", CategoryScale::Clip, &mut diagnostics), 0.0);
        assert_eq!(scale_cell("1.5", CategoryScale::Clip, &mut diagnostics), 1.0);
        assert_eq!(scale_cell(" 0.25 ", CategoryScale::Clip, &mut diagnostics), 0.25);

        assert_eq!(diagnostics.unparseable, 3);
        assert_eq!(diagnostics.clipped_low, 1);
        assert_eq!(diagnostics.clipped_high, 1);
    }

    #[test]
    fn test_predicted_label() {
        let probabilities = vec![
            ("Bored".to_string(), 0.2),
            ("Confused".to_string(), 0.7),
            ("Engaged".to_string(), 0.7),
        ];
        assert_eq!(predicted_label(&probabilities), Some("Confused"));
        assert_eq!(predicted_label(&[]), None);
    }

    #[test]
    fn test_category_ranges() {
        let mut diagnostics = AffectDiagnostics::default();
        diagnostics.record_scaled("Bored", 0.4);
        diagnostics.record_scaled("Bored", 0.1);
        diagnostics.record_scaled("Bored", 0.9);
        diagnostics.record_scaled("Engaged", 0.5);

        assert_eq!(
            diagnostics.category_ranges.get("Bored"),
            Some(&ScaledRange { min: 0.1, max: 0.9 })
        );
        assert_eq!(
            diagnostics.category_ranges.get("Engaged"),
            Some(&ScaledRange { min: 0.5, max: 0.5 })
        );
    }
}
