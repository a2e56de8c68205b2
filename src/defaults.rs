use crate::model::{ExamSection, Gender, GradedExamSection, MultilingualText, ReportData};
use chrono::NaiveDate;

const SAMPLE_GRADES: [f64; 3] = [1.3, 2.0, 1.0];

pub fn default_exam_sections() -> Vec<ExamSection> {
    vec![
        ExamSection {
            name: MultilingualText::new("Arabisch", "لغة عربية"),
            weight: 40.0,
        },
        ExamSection {
            name: MultilingualText::new("Quran", "قرآن"),
            weight: 35.0,
        },
        ExamSection {
            name: MultilingualText::new("Islamkunde", "تربية إسلامية"),
            weight: 25.0,
        },
    ]
}

/// The sample report shown when a certificate page has no usable token.
/// Built fresh on every call; grades are fixed so two renders always match.
pub fn default_report(date: NaiveDate) -> ReportData {
    let exam_sections = default_exam_sections()
        .iter()
        .zip(SAMPLE_GRADES)
        .map(|(s, g)| GradedExamSection::graded(s, g))
        .collect();

    ReportData {
        school_year: "2024-2025".to_string(),
        student_name: Some("أحمد محمد".to_string()),
        classroom: Some("الفوج السادس".to_string()),
        gender: Gender::Male,
        exam_sections,
        notes: Some("طالب متميز ومجتهد".to_string()),
        date: iso_date(date),
        attendance: None,
    }
}

pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parses an optional `YYYY-MM-DD` string, falling back to `fallback`.
pub fn parse_date_or(raw: Option<&str>, fallback: NaiveDate) -> NaiveDate {
    raw.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        .unwrap_or(fallback)
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
