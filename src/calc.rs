use crate::model::GradedExamSection;
use serde::{Deserialize, Serialize};

pub const GRADE_MIN: f64 = 1.0;
pub const GRADE_MAX: f64 = 6.0;
pub const WEIGHT_MIN: f64 = 0.0;
pub const WEIGHT_MAX: f64 = 100.0;
pub const WEIGHT_TOTAL: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradeState {
    Missing,
    OutOfRange,
    Valid(f64),
}

pub fn grade_state(grade: Option<f64>) -> GradeState {
    match grade {
        None => GradeState::Missing,
        Some(g) if g.is_nan() => GradeState::Missing,
        Some(g) if (GRADE_MIN..=GRADE_MAX).contains(&g) => GradeState::Valid(g),
        Some(_) => GradeState::OutOfRange,
    }
}

pub fn is_valid_grade(grade: Option<f64>) -> bool {
    matches!(grade_state(grade), GradeState::Valid(_))
}

pub fn sections_complete(sections: &[GradedExamSection]) -> bool {
    sections.iter().all(|s| is_valid_grade(s.grade))
}

pub fn weight_total(sections: &[GradedExamSection]) -> f64 {
    sections.iter().map(|s| s.weight).sum()
}

/// One-decimal rounding, half away from zero (1.25 -> 1.3, -1.25 -> -1.3).
pub fn round_off_1_decimal(x: f64) -> f64 {
    (10.0 * x).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalMode {
    #[default]
    Weighted,
    Simple,
}

impl TotalMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weighted" => Some(Self::Weighted),
            "simple" => Some(Self::Simple),
            _ => None,
        }
    }
}

/// Total grade for a student, or None when any grade is missing or outside
/// 1..=6. Weighted mode additionally requires the weights to add up to
/// exactly 100; a near miss is still None.
pub fn total_grade(sections: &[GradedExamSection], mode: TotalMode) -> Option<f64> {
    if sections.is_empty() || !sections_complete(sections) {
        return None;
    }

    let grades = sections.iter().filter_map(|s| s.grade);
    match mode {
        TotalMode::Weighted => {
            if weight_total(sections) != WEIGHT_TOTAL {
                return None;
            }
            let weighted_sum: f64 = sections
                .iter()
                .map(|s| s.grade.unwrap_or(0.0) * s.weight)
                .sum();
            Some(round_off_1_decimal(weighted_sum / WEIGHT_TOTAL))
        }
        TotalMode::Simple => {
            let sum: f64 = grades.sum();
            Some(round_off_1_decimal(sum / sections.len() as f64))
        }
    }
}

/// Left edge of each section's weight bar: the sum of all weights before it.
pub fn weight_bar_offsets(sections: &[GradedExamSection]) -> Vec<f64> {
    let mut acc = 0.0;
    sections
        .iter()
        .map(|s| {
            let start = acc;
            acc += s.weight;
            start
        })
        .collect()
}

pub fn format_grade(grade: Option<f64>) -> String {
    match grade {
        Some(g) if g.is_finite() => format!("{:.1}", round_off_1_decimal(g)),
        _ => String::new(),
    }
}
