//! Confidence scoring, the primary convergence signal.

use serde::{Deserialize, Serialize};

/// Minimum overall score required for convergence.
pub const CONVERGENCE_SCORE_THRESHOLD: f64 = 0.9;

/// Consecutive green test signals required for convergence.
pub const CONVERGENCE_STREAK_THRESHOLD: u32 = 3;

/// Coverage percentage at which the coverage bonus saturates.
const COVERAGE_TARGET: f64 = 80.0;

/// Objective quality signals gathered from test runs, type checks, and
/// checklist progress, plus the score derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    /// Last type check passed
    pub types_safe: bool,
    /// Last schema validation passed
    pub schema_valid: bool,
    /// Last test run passed
    pub tests_pass: bool,
    /// Test coverage percentage (0-100)
    pub coverage: f64,
    /// Every checklist item is completed
    pub checklist_complete: bool,
    /// Derived score in [0.0, 1.0]; see [`overall_score`]
    pub overall_score: f64,
}

impl Default for Confidence {
    fn default() -> Self {
        Self {
            types_safe: false,
            schema_valid: false,
            tests_pass: false,
            coverage: 0.0,
            checklist_complete: false,
            overall_score: 0.0,
        }
    }
}

impl Confidence {
    /// Recompute `overall_score` from the current signal fields.
    pub fn rescore(&mut self) {
        self.overall_score = overall_score(self);
    }

    /// Overall score as a percentage, for prompt and log rendering.
    pub fn percent(&self) -> f64 {
        self.overall_score * 100.0
    }
}

/// Derive the overall quality score. Deterministic and total.
///
/// Failing types or schema zeroes the score outright; failing tests cap it
/// at 0.3. Otherwise the score is a 0.5 base plus up to 0.25 for coverage
/// (saturating at 80%) and 0.25 for a complete checklist.
pub fn overall_score(confidence: &Confidence) -> f64 {
    if !confidence.types_safe || !confidence.schema_valid {
        return 0.0;
    }
    if !confidence.tests_pass {
        return 0.3;
    }
    let coverage_bonus = (confidence.coverage / COVERAGE_TARGET).min(1.0) * 0.25;
    let checklist_bonus = if confidence.checklist_complete { 0.25 } else { 0.0 };
    (0.5 + coverage_bonus + checklist_bonus).min(1.0)
}

/// The terminal condition: a sustained high score. Three consecutive green
/// signals are required so a single flaky pass cannot declare success.
pub fn has_converged(score: f64, convergence_streak: u32) -> bool {
    score >= CONVERGENCE_SCORE_THRESHOLD && convergence_streak >= CONVERGENCE_STREAK_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn green(coverage: f64, checklist_complete: bool) -> Confidence {
        Confidence {
            types_safe: true,
            schema_valid: true,
            tests_pass: true,
            coverage,
            checklist_complete,
            overall_score: 0.0,
        }
    }

    #[test]
    fn test_types_unsafe_zeroes_score() {
        let mut c = green(100.0, true);
        c.types_safe = false;
        assert_eq!(overall_score(&c), 0.0);
    }

    #[test]
    fn test_schema_invalid_zeroes_score() {
        let mut c = green(100.0, true);
        c.schema_valid = false;
        assert_eq!(overall_score(&c), 0.0);
    }

    #[test]
    fn test_failing_tests_cap_at_0_3() {
        let mut c = green(100.0, true);
        c.tests_pass = false;
        assert_eq!(overall_score(&c), 0.3);
    }

    #[test]
    fn test_full_marks() {
        assert_eq!(overall_score(&green(95.0, true)), 1.0);
    }

    #[test]
    fn test_coverage_saturates_at_target() {
        let at_target = overall_score(&green(80.0, false));
        let over_target = overall_score(&green(100.0, false));
        assert_eq!(at_target, 0.75);
        assert_eq!(over_target, 0.75);
    }

    #[test]
    fn test_partial_coverage_scales() {
        let c = green(40.0, false);
        assert!((overall_score(&c) - 0.625).abs() < 1e-9);
    }

    #[test]
    fn test_convergence_needs_both_score_and_streak() {
        assert!(!has_converged(1.0, 2));
        assert!(!has_converged(0.89, 3));
        assert!(has_converged(0.9, 3));
        assert!(has_converged(1.0, 5));
    }
}
