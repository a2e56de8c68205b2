use crate::calc::{self, GradeState};
use crate::codec::{self, CodecError, LinkConfig};
use crate::defaults;
use crate::model::{
    AttendanceData, Gender, GradedExamSection, Lang, MultilingualText, ReportData,
};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Validation messages keyed by field: `weights`, `schoolYear`, `classroom`,
/// `examDate`, `name-{studentId}`, `grade-{studentId}-{sectionKey}`.
pub type ValidationErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterSection {
    /// Stable join key for student grades. Survives renames.
    #[serde(default)]
    pub key: String,
    pub name: MultilingualText,
    pub weight: f64,
}

impl RosterSection {
    pub fn new(name: MultilingualText, weight: f64) -> Self {
        Self {
            key: new_id(),
            name,
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub gender: Gender,
    #[serde(default)]
    pub grades: BTreeMap<String, Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance: Option<AttendanceData>,
}

impl Student {
    pub fn grade(&self, section_key: &str) -> Option<f64> {
        self.grades.get(section_key).copied().flatten()
    }
}

/// Fields to change on one student; `None` leaves a field as it is.
/// `notes` and `attendance` take `Some(None)` to clear the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub gender: Option<Gender>,
    pub notes: Option<Option<String>>,
    pub attendance: Option<Option<AttendanceData>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentFilter {
    #[default]
    All,
    Complete,
    Incomplete,
}

impl StudentFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "complete" => Some(Self::Complete),
            "incomplete" => Some(Self::Incomplete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedLink {
    pub student_id: String,
    pub student_name: String,
    pub token: String,
    pub url: String,
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("roster has {} validation error(s)", .0.len())]
    Invalid(ValidationErrors),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The grading session's working set: class metadata, the ordered section
/// list and the students being graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    pub school_year: String,
    pub classroom: String,
    pub exam_date: String,
    pub exam_sections: Vec<RosterSection>,
    pub students: Vec<Student>,
}

impl Roster {
    pub fn new_default(today: NaiveDate) -> Self {
        Self {
            school_year: today.year().to_string(),
            classroom: String::new(),
            exam_date: defaults::iso_date(today),
            exam_sections: defaults::default_exam_sections()
                .into_iter()
                .map(|s| RosterSection::new(s.name, s.weight))
                .collect(),
            students: Vec::new(),
        }
    }

    /// Reads a stored session. Sessions written before sections had keys
    /// joined grades on the German section name; those are re-keyed here.
    pub fn from_stored_value(value: serde_json::Value) -> anyhow::Result<Self> {
        let mut roster: Roster = serde_json::from_value(value)?;
        roster.assign_missing_keys();
        Ok(roster)
    }

    /// Sections sharing a German name all receive the grade stored under it.
    fn assign_missing_keys(&mut self) {
        let mut legacy_names: Vec<String> = Vec::new();
        for section in self.exam_sections.iter_mut() {
            if !section.key.is_empty() {
                continue;
            }
            section.key = new_id();
            if legacy_names.contains(&section.name.de) {
                tracing::warn!(
                    section = %section.name.de,
                    "stored session has duplicate section names; copying grades to each"
                );
            } else {
                legacy_names.push(section.name.de.clone());
            }
            for student in self.students.iter_mut() {
                if let Some(grade) = student.grades.get(&section.name.de).copied() {
                    student.grades.insert(section.key.clone(), grade);
                }
            }
        }
        for student in self.students.iter_mut() {
            for name in &legacy_names {
                student.grades.remove(name);
            }
        }
    }

    pub fn section(&self, key: &str) -> Option<&RosterSection> {
        self.exam_sections.iter().find(|s| s.key == key)
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn add_section(&mut self, name: MultilingualText, weight: f64) -> String {
        let section = RosterSection::new(name, clamp_weight(weight));
        let key = section.key.clone();
        self.exam_sections.push(section);
        key
    }

    pub fn rename_section(&mut self, key: &str, name: MultilingualText) -> bool {
        match self.exam_sections.iter_mut().find(|s| s.key == key) {
            Some(s) => {
                s.name = name;
                true
            }
            None => false,
        }
    }

    pub fn set_section_weight(&mut self, key: &str, weight: f64) -> bool {
        match self.exam_sections.iter_mut().find(|s| s.key == key) {
            Some(s) => {
                s.weight = clamp_weight(weight);
                true
            }
            None => false,
        }
    }

    pub fn remove_section(&mut self, key: &str) -> bool {
        let before = self.exam_sections.len();
        self.exam_sections.retain(|s| s.key != key);
        if self.exam_sections.len() == before {
            return false;
        }
        for student in self.students.iter_mut() {
            student.grades.remove(key);
        }
        true
    }

    pub fn add_student(&mut self, name: &str, gender: Gender, notes: Option<String>) -> String {
        let id = new_id();
        self.students.push(Student {
            id: id.clone(),
            name: name.to_string(),
            gender,
            grades: BTreeMap::new(),
            notes,
            attendance: None,
        });
        id
    }

    pub fn update_student(&mut self, id: &str, update: StudentUpdate) -> bool {
        let Some(student) = self.students.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        if let Some(name) = update.name {
            student.name = name;
        }
        if let Some(gender) = update.gender {
            student.gender = gender;
        }
        if let Some(notes) = update.notes {
            student.notes = notes;
        }
        if let Some(attendance) = update.attendance {
            student.attendance = attendance;
        }
        true
    }

    /// Weighted total of the student's projected report, as the grid shows it.
    pub fn student_total(&self, student: &Student) -> Option<f64> {
        calc::total_grade(&self.project_report(student).exam_sections, calc::TotalMode::Weighted)
    }

    pub fn remove_student(&mut self, id: &str) -> bool {
        let before = self.students.len();
        self.students.retain(|s| s.id != id);
        self.students.len() != before
    }

    pub fn set_grade(&mut self, student_id: &str, section_key: &str, grade: Option<f64>) -> bool {
        if self.section(section_key).is_none() {
            return false;
        }
        let Some(student) = self.students.iter_mut().find(|s| s.id == student_id) else {
            return false;
        };
        match grade {
            Some(g) => {
                student.grades.insert(section_key.to_string(), Some(g));
            }
            None => {
                student.grades.remove(section_key);
            }
        }
        true
    }

    pub fn weight_total(&self) -> f64 {
        self.exam_sections.iter().map(|s| s.weight).sum()
    }

    pub fn student_complete(&self, student: &Student) -> bool {
        !student.name.trim().is_empty()
            && self
                .exam_sections
                .iter()
                .all(|s| calc::is_valid_grade(student.grade(&s.key)))
    }

    pub fn filter_students(&self, filter: StudentFilter, query: &str) -> Vec<&Student> {
        let needle = query.to_lowercase();
        self.students
            .iter()
            .filter(|s| match filter {
                StudentFilter::All => true,
                StudentFilter::Complete => self.student_complete(s),
                StudentFilter::Incomplete => !self.student_complete(s),
            })
            .filter(|s| s.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn validate(&self, lang: Lang) -> ValidationErrors {
        let msg = messages(lang);
        let mut errors = ValidationErrors::new();

        if self.weight_total() != calc::WEIGHT_TOTAL {
            errors.insert("weights".to_string(), msg.weights_sum.to_string());
        }
        for (field, value) in [
            ("schoolYear", &self.school_year),
            ("classroom", &self.classroom),
            ("examDate", &self.exam_date),
        ] {
            if value.trim().is_empty() {
                errors.insert(field.to_string(), msg.required_field.to_string());
            }
        }

        for student in &self.students {
            if student.name.trim().is_empty() {
                errors.insert(format!("name-{}", student.id), msg.required_field.to_string());
            }
            for section in &self.exam_sections {
                let key = format!("grade-{}-{}", student.id, section.key);
                match calc::grade_state(student.grade(&section.key)) {
                    GradeState::Valid(_) => {}
                    GradeState::Missing => {
                        errors.insert(key, msg.required_field.to_string());
                    }
                    GradeState::OutOfRange => {
                        errors.insert(key, msg.invalid_grade.to_string());
                    }
                }
            }
        }
        errors
    }

    /// One report per student: sections in roster order, each joined to the
    /// student's grade by section key.
    pub fn project_report(&self, student: &Student) -> ReportData {
        ReportData {
            school_year: self.school_year.clone(),
            student_name: Some(student.name.clone()),
            classroom: Some(self.classroom.clone()),
            gender: student.gender,
            exam_sections: self
                .exam_sections
                .iter()
                .map(|s| GradedExamSection {
                    name: s.name.clone(),
                    weight: s.weight,
                    grade: student.grade(&s.key),
                })
                .collect(),
            notes: student.notes.clone(),
            date: self.exam_date.clone(),
            attendance: student.attendance,
        }
    }

    pub fn generate_links(&self, lang: Lang, cfg: &LinkConfig) -> Result<Vec<GeneratedLink>, LinkError> {
        let errors = self.validate(lang);
        if !errors.is_empty() {
            return Err(LinkError::Invalid(errors));
        }

        let mut links = Vec::with_capacity(self.students.len());
        for student in &self.students {
            let token = codec::compress(&self.project_report(student))?;
            links.push(GeneratedLink {
                student_id: student.id.clone(),
                student_name: student.name.clone(),
                url: codec::report_link(cfg, lang, &token),
                token,
            });
        }
        tracing::info!(count = links.len(), lang = lang.as_str(), "generated report links");
        Ok(links)
    }
}

/// Splits 100 across `n` sections: each gets `floor(100 / n)`, the last one
/// takes whatever is left so the total is exactly 100.
pub fn equal_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let each = (100 / n) as f64;
    let mut out = vec![each; n];
    out[n - 1] = 100.0 - each * (n - 1) as f64;
    out
}

/// Grade cell input: empty clears the grade; otherwise a number of at most
/// three characters ("1", "2.7"). Anything else is rejected.
pub fn parse_grade_input(raw: &str) -> Result<Option<f64>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if raw.chars().count() > 3 {
        return Err(format!("grade input too long: {raw}"));
    }
    raw.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|g| g.is_finite())
        .map(Some)
        .ok_or_else(|| format!("grade input is not a number: {raw}"))
}

fn clamp_weight(weight: f64) -> f64 {
    if weight.is_finite() {
        weight.clamp(calc::WEIGHT_MIN, calc::WEIGHT_MAX)
    } else {
        0.0
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

struct Messages {
    weights_sum: &'static str,
    required_field: &'static str,
    invalid_grade: &'static str,
}

fn messages(lang: Lang) -> Messages {
    match lang {
        Lang::De => Messages {
            weights_sum: "Die Summe der Gewichtungen muss 100% ergeben",
            required_field: "Pflichtfeld",
            invalid_grade: "Note muss zwischen 1 und 6 liegen",
        },
        Lang::Ar => Messages {
            weights_sum: "مجموع النسب يجب أن يساوي 100%",
            required_field: "حقل إجباري",
            invalid_grade: "الدرجة يجب أن تكون بين 1 و 6",
        },
    }
}
