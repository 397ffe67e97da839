//! Soft validation engine for dynamic feature rows.
//!
//! Validation never raises and never drops data: anomalous values are
//! flagged (and unstable ratios nullified), then the row is persisted
//! anyway with its status stamped on. Violations are expected and
//! frequent, so the outcome is a tagged result, not an error path.
//!
//! Pipeline order:
//! 1. denominator-guard nullification (tiny denominator → ratio nulled)
//! 2. static range check
//! 3. relative-jump check against the most recent prior row
//! 4. internal consistency (capped variant vs uncapped)

use crate::domain::{FeatureRow, ValidationStatus};

/// Free cash flow magnitudes at or below this make price/FCF unreliable.
pub const TINY_FCF: f64 = 1.0;
/// EBITDA magnitudes at or below this make net-debt/EBITDA unreliable.
pub const TINY_EBITDA: f64 = 1.0;
/// Prior values below this magnitude are excluded from jump checks to
/// avoid division blow-ups near zero.
pub const MIN_PRIOR_MAGNITUDE: f64 = 1e-6;

/// Latest-revision range bounds. A yield of exactly zero is valid.
pub const DIVIDEND_YIELD_RANGE: (f64, f64) = (0.0, 0.25);
pub const PFCF_RATIO_RANGE: (f64, f64) = (0.0, 300.0);
pub const NET_DEBT_TO_EBITDA_RANGE: (f64, f64) = (-10.0, 20.0);

/// Relative-jump limits (ratio of magnitudes vs the prior row).
pub const PFCF_RATIO_JUMP_LIMIT: f64 = 15.0;
pub const NET_DEBT_TO_EBITDA_JUMP_LIMIT: f64 = 25.0;
pub const DIVIDEND_YIELD_JUMP_LIMIT: f64 = 10.0;

/// Nullify a ratio when its denominator's magnitude is at or below epsilon.
#[derive(Debug, Clone)]
pub struct RatioGuard {
    pub ratio: String,
    pub denominator: String,
    pub epsilon: f64,
    /// Violation code emitted on nullification.
    pub code: String,
}

/// Closed-or-open numeric range for one feature.
#[derive(Debug, Clone)]
pub struct RangeRule {
    pub feature: String,
    pub lo: f64,
    pub hi: f64,
    pub lo_inclusive: bool,
    pub hi_inclusive: bool,
    /// When false, a missing or non-finite value is itself a violation.
    pub allow_missing: bool,
}

impl RangeRule {
    fn contains(&self, v: f64) -> bool {
        let above = if self.lo_inclusive { v >= self.lo } else { v > self.lo };
        let below = if self.hi_inclusive { v <= self.hi } else { v < self.hi };
        above && below
    }

    fn bounds_display(&self) -> String {
        format!(
            "{}{}, {}{}",
            if self.lo_inclusive { "[" } else { "(" },
            self.lo,
            self.hi,
            if self.hi_inclusive { "]" } else { ")" },
        )
    }
}

/// Flag a feature whose magnitude moved more than `max_ratio`x vs the prior row.
#[derive(Debug, Clone)]
pub struct JumpRule {
    pub feature: String,
    pub max_ratio: f64,
}

/// A capped ratio variant must never exceed its uncapped counterpart.
#[derive(Debug, Clone)]
pub struct CappedPair {
    pub capped: String,
    pub uncapped: String,
}

/// All validator thresholds, overridable per run. The defaults follow the
/// latest revision of the production thresholds.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub guards: Vec<RatioGuard>,
    pub ranges: Vec<RangeRule>,
    pub jumps: Vec<JumpRule>,
    pub capped_pairs: Vec<CappedPair>,
    pub min_prior_magnitude: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            guards: vec![
                RatioGuard {
                    ratio: "pfcf_ratio".into(),
                    denominator: "free_cash_flow".into(),
                    epsilon: TINY_FCF,
                    code: "pfcf_ratio_nullified_tiny_fcf".into(),
                },
                RatioGuard {
                    ratio: "net_debt_to_ebitda".into(),
                    denominator: "ebitda".into(),
                    epsilon: TINY_EBITDA,
                    code: "net_debt_to_ebitda_nullified_tiny_ebitda".into(),
                },
            ],
            ranges: vec![
                RangeRule {
                    feature: "dividend_yield".into(),
                    lo: DIVIDEND_YIELD_RANGE.0,
                    hi: DIVIDEND_YIELD_RANGE.1,
                    lo_inclusive: true,
                    hi_inclusive: false,
                    allow_missing: true,
                },
                RangeRule {
                    feature: "pfcf_ratio".into(),
                    lo: PFCF_RATIO_RANGE.0,
                    hi: PFCF_RATIO_RANGE.1,
                    lo_inclusive: false,
                    hi_inclusive: false,
                    allow_missing: true,
                },
                RangeRule {
                    feature: "net_debt_to_ebitda".into(),
                    lo: NET_DEBT_TO_EBITDA_RANGE.0,
                    hi: NET_DEBT_TO_EBITDA_RANGE.1,
                    lo_inclusive: false,
                    hi_inclusive: false,
                    allow_missing: true,
                },
            ],
            jumps: vec![
                JumpRule {
                    feature: "pfcf_ratio".into(),
                    max_ratio: PFCF_RATIO_JUMP_LIMIT,
                },
                JumpRule {
                    feature: "net_debt_to_ebitda".into(),
                    max_ratio: NET_DEBT_TO_EBITDA_JUMP_LIMIT,
                },
                JumpRule {
                    feature: "dividend_yield".into(),
                    max_ratio: DIVIDEND_YIELD_JUMP_LIMIT,
                },
            ],
            capped_pairs: vec![CappedPair {
                capped: "ebit_interest_cover_capped".into(),
                uncapped: "ebit_interest_cover".into(),
            }],
            min_prior_magnitude: MIN_PRIOR_MAGNITUDE,
        }
    }
}

/// Tagged validation outcome. Flagged rows carry their violation list and
/// are still persisted; nullification mutations are present either way.
#[derive(Debug, Clone)]
pub enum Validated {
    Ok(FeatureRow),
    Flagged(FeatureRow, Vec<String>),
}

impl Validated {
    pub fn status(&self) -> ValidationStatus {
        match self {
            Validated::Ok(_) => ValidationStatus::Ok,
            Validated::Flagged(..) => ValidationStatus::Flagged,
        }
    }

    pub fn row(&self) -> &FeatureRow {
        match self {
            Validated::Ok(r) | Validated::Flagged(r, _) => r,
        }
    }

    pub fn violations(&self) -> &[String] {
        match self {
            Validated::Ok(_) => &[],
            Validated::Flagged(_, v) => v,
        }
    }

    /// Consume the outcome, stamping status and violations onto the row.
    pub fn into_stamped_row(self) -> FeatureRow {
        match self {
            Validated::Ok(mut r) => {
                r.stamp(ValidationStatus::Ok, Vec::new());
                r
            }
            Validated::Flagged(mut r, violations) => {
                r.stamp(ValidationStatus::Flagged, violations);
                r
            }
        }
    }
}

/// Validate one row against the prior persisted row for the same ticker.
///
/// Pure; never fails. `prior` is the most recent kept row by snapshot
/// date, used only for the relative-jump check.
pub fn validate(mut row: FeatureRow, prior: Option<&FeatureRow>, cfg: &ValidatorConfig) -> Validated {
    let mut violations: Vec<String> = Vec::new();

    // 1. Nullify ratios with unreliable denominators.
    for guard in &cfg.guards {
        let denom = row.get_f64(&guard.denominator);
        let has_ratio = row.get_f64(&guard.ratio).is_some();
        if let (Some(d), true) = (denom, has_ratio) {
            if d.is_finite() && d.abs() <= guard.epsilon {
                row.set(&guard.ratio, crate::domain::Value::Null);
                violations.push(guard.code.clone());
            }
        }
    }

    // 2. Static ranges.
    for rule in &cfg.ranges {
        if !row.values.contains_key(&rule.feature) {
            continue;
        }
        match row.get_f64(&rule.feature) {
            Some(v) if v.is_finite() => {
                if !rule.contains(v) {
                    violations.push(format!(
                        "{} out-of-bounds: {} not in {}",
                        rule.feature,
                        v,
                        rule.bounds_display()
                    ));
                }
            }
            _ => {
                if !rule.allow_missing {
                    violations.push(format!("{} missing required value", rule.feature));
                }
            }
        }
    }

    // 3. Relative jumps vs the prior row.
    if let Some(prev) = prior {
        for rule in &cfg.jumps {
            let (Some(cur), Some(old)) = (row.get_f64(&rule.feature), prev.get_f64(&rule.feature))
            else {
                continue;
            };
            if !cur.is_finite() || !old.is_finite() || old.abs() < cfg.min_prior_magnitude {
                continue;
            }
            let ratio = (cur / old).abs();
            if ratio > rule.max_ratio {
                violations.push(format!(
                    "{} abnormal change: {:.4} -> {:.4} (x{:.2})",
                    rule.feature, old, cur, ratio
                ));
            }
        }
    }

    // 4. Internal consistency.
    for pair in &cfg.capped_pairs {
        let (Some(capped), Some(uncapped)) =
            (row.get_f64(&pair.capped), row.get_f64(&pair.uncapped))
        else {
            continue;
        };
        if capped.is_finite() && uncapped.is_finite() && capped > uncapped {
            violations.push(format!(
                "{} inconsistent: {} exceeds {} ({})",
                pair.capped, capped, pair.uncapped, uncapped
            ));
        }
    }

    if violations.is_empty() {
        Validated::Ok(row)
    } else {
        Validated::Flagged(row, violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ticker;
    use chrono::NaiveDate;

    fn row(as_of_year: i32) -> FeatureRow {
        FeatureRow::new(
            Ticker::new("AAA"),
            NaiveDate::from_ymd_opt(as_of_year, 12, 31).unwrap(),
        )
    }

    #[test]
    fn clean_row_is_ok() {
        let mut r = row(2022);
        r.set("dividend_yield", 0.02);
        r.set("pfcf_ratio", 25.0);
        r.set("free_cash_flow", 5_000.0);
        let out = validate(r, None, &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Ok);
        assert!(out.violations().is_empty());
    }

    #[test]
    fn tiny_fcf_nullifies_pfcf_and_flags() {
        let mut r = row(2022);
        r.set("free_cash_flow", 0.2);
        r.set("pfcf_ratio", 1000.0);
        let out = validate(r, None, &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Flagged);
        assert!(out
            .violations()
            .iter()
            .any(|v| v.contains("nullified_tiny")));
        assert!(out.row().get_f64("pfcf_ratio").is_none());
        // Nullified means no out-of-bounds violation on the ratio itself.
        assert!(!out.violations().iter().any(|v| v.contains("out-of-bounds")));
    }

    #[test]
    fn tiny_ebitda_nullifies_net_debt_ratio() {
        let mut r = row(2022);
        r.set("ebitda", 0.4);
        r.set("net_debt_to_ebitda", 180.0);
        let out = validate(r, None, &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Flagged);
        assert!(out.row().get_f64("net_debt_to_ebitda").is_none());
    }

    #[test]
    fn out_of_range_dividend_yield_flags() {
        let mut r = row(2022);
        r.set("dividend_yield", 999.0);
        let out = validate(r, None, &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Flagged);
        assert!(out
            .violations()
            .iter()
            .any(|v| v.contains("dividend_yield") && v.contains("out-of-bounds")));
    }

    #[test]
    fn zero_yield_is_valid() {
        let mut r = row(2022);
        r.set("dividend_yield", 0.0);
        let out = validate(r, None, &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Ok);
    }

    #[test]
    fn missing_value_is_fine_when_allowed() {
        let mut r = row(2022);
        r.set("dividend_yield", crate::domain::Value::Null);
        let out = validate(r, None, &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Ok);
    }

    #[test]
    fn missing_value_violates_when_required() {
        let mut cfg = ValidatorConfig::default();
        cfg.ranges[0].allow_missing = false;
        let mut r = row(2022);
        r.set("dividend_yield", crate::domain::Value::Null);
        let out = validate(r, None, &cfg);
        assert_eq!(out.status(), ValidationStatus::Flagged);
        assert!(out.violations()[0].contains("missing"));
    }

    #[test]
    fn non_finite_value_never_range_violates() {
        let mut r = row(2022);
        r.set("dividend_yield", f64::NAN);
        let out = validate(r, None, &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Ok);
    }

    #[test]
    fn large_jump_flags_small_jump_does_not() {
        let mut prev = row(2021);
        prev.set("dividend_yield", 0.01);

        let mut cur = row(2022);
        cur.set("dividend_yield", 0.2);
        let out = validate(cur, Some(&prev), &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Flagged);
        assert!(out
            .violations()
            .iter()
            .any(|v| v.contains("abnormal change")));

        let mut cur = row(2022);
        cur.set("dividend_yield", 0.05);
        let out = validate(cur, Some(&prev), &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Ok);
    }

    #[test]
    fn jump_check_skips_tiny_priors() {
        let mut prev = row(2021);
        prev.set("dividend_yield", 1e-9);
        let mut cur = row(2022);
        cur.set("dividend_yield", 0.2);
        let out = validate(cur, Some(&prev), &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Ok);
    }

    #[test]
    fn capped_exceeding_uncapped_flags() {
        let mut r = row(2022);
        r.set("ebit_interest_cover", 10.0);
        r.set("ebit_interest_cover_capped", 12.0);
        let out = validate(r, None, &ValidatorConfig::default());
        assert_eq!(out.status(), ValidationStatus::Flagged);
        assert!(out.violations()[0].contains("inconsistent"));
    }

    #[test]
    fn stamped_row_carries_joined_violations() {
        let mut r = row(2022);
        r.set("dividend_yield", 999.0);
        r.set("free_cash_flow", 0.2);
        r.set("pfcf_ratio", 1000.0);
        let stamped = validate(r, None, &ValidatorConfig::default()).into_stamped_row();
        assert_eq!(stamped.status, Some(ValidationStatus::Flagged));
        assert!(stamped.violations_joined().contains(';'));
    }
}
