use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    De,
    Ar,
}

impl Lang {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "de" => Some(Self::De),
            "ar" => Some(Self::Ar),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::De => "de",
            Self::Ar => "ar",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::De => Self::Ar,
            Self::Ar => Self::De,
        }
    }
}

/// Text carried in both supported languages. Both keys are always present;
/// an empty string means "not translated yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultilingualText {
    pub de: String,
    pub ar: String,
}

impl MultilingualText {
    pub fn new(de: impl Into<String>, ar: impl Into<String>) -> Self {
        Self {
            de: de.into(),
            ar: ar.into(),
        }
    }

    /// Same text for both languages (imported headers carry no translation).
    pub fn same(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            de: text.clone(),
            ar: text,
        }
    }

    pub fn get(&self, lang: Lang) -> &str {
        match lang {
            Lang::De => &self.de,
            Lang::Ar => &self.ar,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "f")]
    Female,
    #[serde(rename = "m")]
    Male,
}

impl Gender {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "f" => Some(Self::Female),
            "m" => Some(Self::Male),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSection {
    pub name: MultilingualText,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedExamSection {
    pub name: MultilingualText,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<f64>,
}

impl GradedExamSection {
    pub fn graded(section: &ExamSection, grade: f64) -> Self {
        Self {
            name: section.name.clone(),
            weight: section.weight,
            grade: Some(grade),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceData {
    pub attended: u32,
    pub total: u32,
}

/// One student's graded report: the unit carried inside a link token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportData {
    pub school_year: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom: Option<String>,
    pub gender: Gender,
    pub exam_sections: Vec<GradedExamSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance: Option<AttendanceData>,
}

/// Pre-compress guard. JSON has no spelling for NaN or infinity, so a report
/// carrying one would not survive the trip.
pub fn check_report(report: &ReportData) -> anyhow::Result<()> {
    for (i, s) in report.exam_sections.iter().enumerate() {
        if !s.weight.is_finite() {
            return Err(anyhow!("examSections[{}].weight is not a finite number", i));
        }
        if let Some(g) = s.grade {
            if !g.is_finite() {
                return Err(anyhow!("examSections[{}].grade is not a finite number", i));
            }
        }
    }
    Ok(())
}

/// Boundary guard for payloads coming back out of a token (or any other
/// loosely typed source). Structural problems reject the whole payload;
/// malformed optional fields are dropped so older or newer tokens still render.
pub fn validate_report_value(value: &Value) -> Option<ReportData> {
    let obj = value.as_object()?;

    let gender = obj.get("gender").and_then(|v| v.as_str()).and_then(Gender::parse)?;

    let exam_sections = validate_sections_value(obj.get("examSections")?)?;

    Some(ReportData {
        school_year: opt_str(obj, "schoolYear").unwrap_or_default(),
        student_name: opt_str(obj, "studentName"),
        classroom: opt_str(obj, "classroom"),
        gender,
        exam_sections,
        notes: opt_str(obj, "notes"),
        date: opt_str(obj, "date").unwrap_or_default(),
        attendance: obj.get("attendance").and_then(parse_attendance),
    })
}

/// An array of graded sections; any malformed entry rejects the whole list.
pub fn validate_sections_value(value: &Value) -> Option<Vec<GradedExamSection>> {
    value.as_array()?.iter().map(parse_section).collect()
}

/// Parses a `{ de, ar }` object; both keys must be strings.
pub fn parse_multilingual(value: &Value) -> Option<MultilingualText> {
    let obj = value.as_object()?;
    Some(MultilingualText {
        de: obj.get("de")?.as_str()?.to_string(),
        ar: obj.get("ar")?.as_str()?.to_string(),
    })
}

pub fn parse_attendance(value: &Value) -> Option<AttendanceData> {
    let obj = value.as_object()?;
    let attended = u32::try_from(obj.get("attended")?.as_u64()?).ok()?;
    let total = u32::try_from(obj.get("total")?.as_u64()?).ok()?;
    Some(AttendanceData { attended, total })
}

/// A finite JSON number, or None for anything else (null, strings, missing).
pub fn finite_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(|v| v.as_f64()).filter(|n| n.is_finite())
}

fn parse_section(value: &Value) -> Option<GradedExamSection> {
    let obj = value.as_object()?;
    let name = parse_multilingual(obj.get("name")?)?;
    let weight = finite_number(obj.get("weight"))?;
    Some(GradedExamSection {
        name,
        weight,
        grade: finite_number(obj.get("grade")),
    })
}

fn opt_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}
