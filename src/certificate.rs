use crate::calc::{self, TotalMode};
use crate::codec::{self, LinkConfig};
use crate::model::{Gender, Lang, ReportData};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateOptions {
    pub show_weights: bool,
    pub show_attendance: bool,
}

impl Default for CertificateOptions {
    fn default() -> Self {
        Self {
            show_weights: false,
            show_attendance: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateLabels {
    pub title: &'static str,
    pub student_name: &'static str,
    pub group: &'static str,
    pub evaluation_title: &'static str,
    pub weight: &'static str,
    pub student_grade: &'static str,
    pub total_grade: &'static str,
    pub notes: &'static str,
    pub date: &'static str,
    pub attendance: &'static str,
    pub teacher_signature: &'static str,
    pub switch_lang: &'static str,
    pub download: &'static str,
    pub print: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRow {
    pub name: String,
    pub weight: f64,
    pub grade: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bar_start: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceLine {
    pub attended: u32,
    pub total: u32,
    /// More sessions attended than held.
    pub flagged: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateModel {
    pub lang: Lang,
    pub dir: &'static str,
    pub labels: CertificateLabels,
    pub school_year: String,
    pub student_name: String,
    pub classroom: String,
    pub notes: String,
    pub date: String,
    pub show_weights: bool,
    pub rows: Vec<CertificateRow>,
    pub total: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance: Option<AttendanceLine>,
    pub file_name: String,
    pub switch_lang_href: String,
}

/// Everything a certificate page needs to lay out one report in one
/// language. `is_default` marks the built-in sample, whose language switch
/// link carries no token.
pub fn certificate_model(
    report: &ReportData,
    lang: Lang,
    opts: CertificateOptions,
    links: &LinkConfig,
    is_default: bool,
) -> CertificateModel {
    let offsets = calc::weight_bar_offsets(&report.exam_sections);
    let rows = report
        .exam_sections
        .iter()
        .zip(offsets)
        .map(|(s, start)| CertificateRow {
            name: s.name.get(lang).to_string(),
            weight: s.weight,
            grade: calc::format_grade(s.grade),
            bar_start: opts.show_weights.then_some(start),
        })
        .collect();

    let mode = if opts.show_weights {
        TotalMode::Weighted
    } else {
        TotalMode::Simple
    };
    let total = calc::format_grade(calc::total_grade(&report.exam_sections, mode));

    let attendance = report
        .attendance
        .filter(|_| opts.show_attendance)
        .map(|a| AttendanceLine {
            attended: a.attended,
            total: a.total,
            flagged: a.attended > a.total,
        });

    CertificateModel {
        lang,
        dir: match lang {
            Lang::De => "ltr",
            Lang::Ar => "rtl",
        },
        labels: labels(lang, report.gender),
        school_year: report.school_year.clone(),
        student_name: report.student_name.clone().unwrap_or_default(),
        classroom: report.classroom.clone().unwrap_or_default(),
        notes: report.notes.clone().unwrap_or_default(),
        date: report.date.clone(),
        show_weights: opts.show_weights,
        rows,
        total,
        attendance,
        file_name: pdf_file_name(report),
        switch_lang_href: switch_lang_href(report, lang, links, is_default),
    }
}

/// `report_{class}_{student}_{date}.pdf`, using the report's own date.
pub fn pdf_file_name(report: &ReportData) -> String {
    let class = non_blank(report.classroom.as_deref()).unwrap_or("no-class");
    let student = non_blank(report.student_name.as_deref()).unwrap_or("unnamed");
    format!(
        "report_{}_{}_{}.pdf",
        sanitize_for_file_name(class),
        sanitize_for_file_name(student),
        sanitize_for_file_name(&report.date)
    )
}

/// Keeps ASCII letters and digits, Arabic script, whitespace and `-`;
/// whitespace runs become a single `-`; the result is lowercased.
pub fn sanitize_for_file_name(s: &str) -> String {
    let kept: String = s
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || ('\u{0600}'..='\u{06FF}').contains(c)
                || c.is_whitespace()
                || *c == '-'
        })
        .collect();
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

fn switch_lang_href(report: &ReportData, lang: Lang, links: &LinkConfig, is_default: bool) -> String {
    let base = format!(
        "/{}/{}/",
        lang.other().as_str(),
        links.period_slug.trim_matches('/')
    );
    if is_default {
        return base;
    }
    match codec::compress(report) {
        Ok(token) => format!("{}?{}={}", base, codec::QUERY_PARAM, token),
        Err(_) => base,
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn labels(lang: Lang, gender: Gender) -> CertificateLabels {
    match lang {
        Lang::De => CertificateLabels {
            title: "Noten des ersten Semesters Zertifikat",
            student_name: match gender {
                Gender::Male => "Name des Schülers",
                Gender::Female => "Name der Schülerin",
            },
            group: "Gruppe",
            evaluation_title: "Bewertungskriterien",
            weight: "Gewichtung",
            student_grade: "Note",
            total_grade: "Gesamtnote",
            notes: "Anmerkungen",
            date: "Datum",
            attendance: "Anwesenheit",
            teacher_signature: "Unterschrift der Lehrkraft",
            switch_lang: "العربية",
            download: "Als PDF herunterladen",
            print: "Drucken",
        },
        Lang::Ar => CertificateLabels {
            title: "شهادة درجات الفصل الدراسي الأول",
            student_name: match gender {
                Gender::Male => "اسم الطالب",
                Gender::Female => "اسم الطالبة",
            },
            group: "الحلقة",
            evaluation_title: "فرع التقيييم",
            weight: "النسبة",
            student_grade: "العلامة",
            total_grade: "المجموع النهائي",
            notes: "ملاحظات",
            date: "التاريخ",
            attendance: "الحضور",
            teacher_signature: "توقيع المعلم",
            switch_lang: "Deutsch",
            download: "تحميل كملف PDF",
            print: "طباعة",
        },
    }
}
