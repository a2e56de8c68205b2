use crate::model::{Gender, MultilingualText};
use crate::roster::{equal_weights, RosterSection, Student};
use anyhow::{anyhow, Context};
use calamine::{Data, Range, Reader, Xlsx};
use std::collections::BTreeMap;
use std::io::Cursor;
use uuid::Uuid;

/// Cell text that opens the exam block on a student's sheet. The next row
/// names the sections, the row after that holds the scores.
const XLSX_EXAM_MARKER: &str = "امتحان الفصل الدراسى الأول";

/// Summary and template sheets carry no student.
const XLSX_SKIPPED_SHEETS: [&str; 2] = ["Tabelle", "الطالب"];

#[derive(Debug, Clone)]
pub struct ImportedRoster {
    pub sections: Vec<RosterSection>,
    pub students: Vec<Student>,
}

/// Reads a grade sheet: the header names the student column followed by one
/// column per exam section; each further row is a student. Weights are split
/// evenly. Cells that are not numbers leave the grade absent.
pub fn parse_roster_csv(text: &str) -> anyhow::Result<ImportedRoster> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header_line = lines.next().ok_or_else(|| anyhow!("file is empty"))?;
    let delimiter = detect_delimiter(header_line);
    let header = split_record(header_line, delimiter);
    if header.len() < 2 {
        return Err(anyhow!(
            "header needs a name column and at least one section column"
        ));
    }

    let section_names: Vec<String> = header[1..].iter().map(|h| h.trim().to_string()).collect();
    if let Some(i) = section_names.iter().position(|n| n.is_empty()) {
        return Err(anyhow!("section column {} has an empty header", i + 2));
    }

    let sections: Vec<RosterSection> = section_names
        .iter()
        .zip(equal_weights(section_names.len()))
        .map(|(name, weight)| RosterSection::new(MultilingualText::same(name.clone()), weight))
        .collect();

    let mut students = Vec::new();
    for line in lines {
        let cells = split_record(line, delimiter);
        let name = cells.first().map(|c| c.trim().to_string()).unwrap_or_default();
        let mut grades = BTreeMap::new();
        for (i, section) in sections.iter().enumerate() {
            let grade = cells.get(i + 1).and_then(|c| parse_number(c));
            if grade.is_some() {
                grades.insert(section.key.clone(), grade);
            }
        }
        students.push(imported_student(name, grades));
    }

    tracing::info!(
        sections = sections.len(),
        students = students.len(),
        "parsed roster import"
    );
    Ok(ImportedRoster { sections, students })
}

/// Reads an exam workbook with one sheet per student, named after the
/// student. The first sheet with an exam block fixes the section list;
/// other sheets are matched to it by section name.
pub fn parse_roster_xlsx(bytes: &[u8]) -> anyhow::Result<ImportedRoster> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).context("file is not a readable XLSX workbook")?;

    let mut sheets: Vec<(String, Vec<(String, Option<f64>)>)> = Vec::new();
    for sheet_name in workbook.sheet_names() {
        if XLSX_SKIPPED_SHEETS.iter().any(|s| sheet_name.contains(s)) {
            continue;
        }
        let range = match workbook.worksheet_range(&sheet_name) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(sheet = %sheet_name, error = %e, "skipping unreadable sheet");
                continue;
            }
        };
        match exam_scores(&range) {
            Some(scores) => sheets.push((sheet_name, scores)),
            None => tracing::debug!(sheet = %sheet_name, "no exam block on sheet"),
        }
    }

    let (_, first) = sheets
        .first()
        .ok_or_else(|| anyhow!("no exam data found in the workbook"))?;
    let section_names: Vec<String> = first.iter().map(|(name, _)| name.clone()).collect();
    let sections: Vec<RosterSection> = section_names
        .iter()
        .zip(equal_weights(section_names.len()))
        .map(|(name, weight)| RosterSection::new(MultilingualText::same(name.clone()), weight))
        .collect();

    let students: Vec<Student> = sheets
        .iter()
        .map(|(student_name, scores)| {
            let mut grades = BTreeMap::new();
            for section in &sections {
                let score = scores
                    .iter()
                    .find(|(name, _)| *name == section.name.de)
                    .and_then(|(_, score)| *score);
                if score.is_some() {
                    grades.insert(section.key.clone(), score);
                }
            }
            imported_student(student_name.trim().to_string(), grades)
        })
        .collect();

    tracing::info!(
        sections = sections.len(),
        students = students.len(),
        "parsed workbook import"
    );
    Ok(ImportedRoster { sections, students })
}

/// Section name and score for each column filled in on the section row
/// of the exam block. A score that is not a number is absent.
fn exam_scores(range: &Range<Data>) -> Option<Vec<(String, Option<f64>)>> {
    let rows: Vec<&[Data]> = range.rows().collect();
    let marker = rows.iter().position(|row| {
        row.iter()
            .any(|c| cell_text(c).is_some_and(|t| t.contains(XLSX_EXAM_MARKER)))
    })?;
    let section_row = rows.get(marker + 1)?;
    let score_row = rows.get(marker + 2)?;

    let pairs: Vec<(String, Option<f64>)> = section_row
        .iter()
        .enumerate()
        .filter_map(|(col, cell)| {
            let name = cell_text(cell)?;
            let score = score_row.get(col)?;
            if matches!(score, Data::Empty) {
                return None;
            }
            Some((name, cell_number(score)))
        })
        .collect();
    (!pairs.is_empty()).then_some(pairs)
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        other => Some(other.to_string()),
    }
}

fn cell_number(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f).filter(|f| f.is_finite()),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => parse_number(s),
        _ => None,
    }
}

fn imported_student(name: String, grades: BTreeMap<String, Option<f64>>) -> Student {
    Student {
        id: Uuid::new_v4().to_string(),
        name,
        gender: Gender::Male,
        grades,
        notes: Some(String::new()),
        attendance: None,
    }
}

fn detect_delimiter(header: &str) -> char {
    [',', ';', '\t']
        .into_iter()
        .max_by_key(|d| split_record(header, *d).len())
        .unwrap_or(',')
}

fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Splits one record. Double-quoted fields may contain the delimiter and
/// `""` escapes a quote.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => out.push(std::mem::take(&mut cur)),
            c => cur.push(c),
        }
    }
    out.push(cur);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imports_sections_students_and_even_weights() {
        let csv = "Name,Quran,Arabisch,Islamkunde\n\
                   Amina,1.3,2,1.7\n\
                   \n\
                   Omar,2.0,,x\n";
        let imported = parse_roster_csv(csv).expect("import");
        assert_eq!(imported.sections.len(), 3);
        assert_eq!(imported.sections[0].name.de, "Quran");
        assert_eq!(imported.sections[0].name.ar, "Quran");
        let weights: Vec<f64> = imported.sections.iter().map(|s| s.weight).collect();
        assert_eq!(weights, vec![33.0, 33.0, 34.0]);

        assert_eq!(imported.students.len(), 2);
        let amina = &imported.students[0];
        assert_eq!(amina.name, "Amina");
        assert_eq!(amina.gender, Gender::Male);
        assert_eq!(amina.grade(&imported.sections[2].key), Some(1.7));

        let omar = &imported.students[1];
        assert_eq!(omar.grade(&imported.sections[0].key), Some(2.0));
        assert_eq!(omar.grade(&imported.sections[1].key), None);
        assert_eq!(omar.grade(&imported.sections[2].key), None);
    }

    #[test]
    fn quoted_fields_semicolons_and_bom() {
        let csv = "\u{feff}\"Name\";\"Quran; Tajwid\"\r\n\"Haddad, \"\"Sami\"\"\";1,5\r\n";
        let imported = parse_roster_csv(csv).expect("import");
        assert_eq!(imported.sections.len(), 1);
        assert_eq!(imported.sections[0].name.de, "Quran; Tajwid");
        assert_eq!(imported.sections[0].weight, 100.0);
        assert_eq!(imported.students[0].name, "Haddad, \"Sami\"");
        assert_eq!(imported.students[0].grade(&imported.sections[0].key), None);
    }

    fn student_sheet(
        book: &mut rust_xlsxwriter::Workbook,
        name: &str,
        sections: &[&str],
        scores: &[Option<f64>],
    ) {
        let sheet = book.add_worksheet();
        sheet.set_name(name).expect("sheet name");
        sheet.write_string(0, 0, "Zeugnis").expect("write");
        sheet.write_string(2, 1, XLSX_EXAM_MARKER).expect("write");
        for (i, section) in sections.iter().enumerate() {
            sheet.write_string(3, i as u16 + 1, *section).expect("write");
        }
        for (i, score) in scores.iter().enumerate() {
            if let Some(score) = score {
                sheet.write_number(4, i as u16 + 1, *score).expect("write");
            }
        }
    }

    #[test]
    fn imports_one_student_per_sheet() {
        let mut book = rust_xlsxwriter::Workbook::new();
        let overview = book.add_worksheet();
        overview.set_name("Tabelle1").expect("sheet name");
        overview.write_string(0, 0, XLSX_EXAM_MARKER).expect("write");
        overview.write_string(1, 0, "Quran").expect("write");
        overview.write_number(2, 0, 6.0).expect("write");

        let sections = ["Quran", "Tajwid", "Arabisch"];
        student_sheet(&mut book, "Amina", &sections, &[Some(1.3), Some(2.0), Some(1.7)]);
        student_sheet(&mut book, "Omar", &sections, &[Some(2.3), None, Some(3.0)]);
        let notes = book.add_worksheet();
        notes.set_name("Notizen").expect("sheet name");
        notes.write_string(0, 0, "keine Noten hier").expect("write");
        let bytes = book.save_to_buffer().expect("workbook bytes");

        let imported = parse_roster_xlsx(&bytes).expect("import");
        let names: Vec<&str> = imported.sections.iter().map(|s| s.name.de.as_str()).collect();
        assert_eq!(names, vec!["Quran", "Tajwid", "Arabisch"]);
        assert_eq!(imported.sections[2].name.ar, "Arabisch");
        let weights: Vec<f64> = imported.sections.iter().map(|s| s.weight).collect();
        assert_eq!(weights, vec![33.0, 33.0, 34.0]);

        assert_eq!(imported.students.len(), 2);
        let amina = &imported.students[0];
        assert_eq!(amina.name, "Amina");
        assert_eq!(amina.gender, Gender::Male);
        assert_eq!(amina.grade(&imported.sections[2].key), Some(1.7));

        let omar = &imported.students[1];
        assert_eq!(omar.grade(&imported.sections[0].key), Some(2.3));
        assert_eq!(omar.grade(&imported.sections[1].key), None);
        assert_eq!(omar.grade(&imported.sections[2].key), Some(3.0));
    }

    #[test]
    fn workbook_without_exam_block_is_rejected() {
        let mut book = rust_xlsxwriter::Workbook::new();
        let sheet = book.add_worksheet();
        sheet.set_name("Amina").expect("sheet name");
        sheet.write_string(0, 0, "Quran").expect("write");
        let bytes = book.save_to_buffer().expect("workbook bytes");
        assert!(parse_roster_xlsx(&bytes).is_err());
        assert!(parse_roster_xlsx(b"Name,Quran\n").is_err());
    }

    #[test]
    fn rejects_empty_and_headerless_input() {
        assert!(parse_roster_csv("").is_err());
        assert!(parse_roster_csv("Name\nAmina\n").is_err());
        assert!(parse_roster_csv("Name,,Quran\n").is_err());
    }
}
