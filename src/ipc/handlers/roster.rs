use base64::{engine::general_purpose, Engine as _};
use crate::defaults;
use crate::import;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Gender};
use crate::roster::{self, LinkError, Roster, StudentFilter, StudentUpdate};
use crate::session;
use rusqlite::Connection;
use serde_json::json;

use super::{reports, setup};

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// The stored session, or a fresh default roster when nothing usable is saved.
fn current_roster(conn: &Connection) -> (Roster, bool) {
    match session::load(conn) {
        Some(r) => (r, true),
        None => (Roster::new_default(defaults::today()), false),
    }
}

/// Loads the session, applies `edit`, saves and returns the updated roster.
fn edit_roster<F>(state: &AppState, req: &Request, edit: F) -> serde_json::Value
where
    F: FnOnce(&mut Roster) -> Result<serde_json::Value, serde_json::Value>,
{
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (mut roster, _) = current_roster(conn);
    let extra = match edit(&mut roster) {
        Ok(v) => v,
        Err(e) => return e,
    };
    session::save(conn, &roster);
    let mut result = json!({ "roster": roster });
    if let (Some(out), Some(extra)) = (result.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            out.insert(k.clone(), v.clone());
        }
    }
    ok(&req.id, result)
}

fn handle_roster_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (roster, stored) = current_roster(conn);
    ok(&req.id, json!({ "roster": roster, "stored": stored }))
}

fn handle_roster_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("roster") else {
        return err(&req.id, "bad_params", "missing roster", None);
    };
    let roster = match Roster::from_stored_value(raw.clone()) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "bad_params", format!("invalid roster: {e}"), None),
    };
    session::save(conn, &roster);
    ok(&req.id, json!({ "roster": roster }))
}

fn handle_roster_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    session::clear(conn);
    ok(&req.id, json!({ "cleared": true }))
}

fn handle_roster_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    session::clear(conn);
    let roster = Roster::new_default(defaults::today());
    session::save(conn, &roster);
    tracing::info!("grading session reset");
    ok(&req.id, json!({ "roster": roster }))
}

fn handle_roster_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    edit_roster(state, req, |roster| {
        for (key, field) in [
            ("schoolYear", &mut roster.school_year),
            ("classroom", &mut roster.classroom),
            ("examDate", &mut roster.exam_date),
        ] {
            match req.params.get(key) {
                None => {}
                Some(v) => match v.as_str() {
                    Some(s) => *field = s.to_string(),
                    None => {
                        return Err(err(&req.id, "bad_params", format!("{key} must be string"), None))
                    }
                },
            }
        }
        Ok(json!({}))
    })
}

fn handle_roster_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lang = match reports::parse_lang(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (roster, _) = current_roster(conn);
    let errors = roster.validate(lang);
    ok(
        &req.id,
        json!({
            "valid": errors.is_empty(),
            "errors": errors,
            "weightTotal": roster.weight_total()
        }),
    )
}

fn handle_roster_filter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filter = match req.params.get("filter").and_then(|v| v.as_str()) {
        None => StudentFilter::default(),
        Some(raw) => match StudentFilter::parse(raw) {
            Some(f) => f,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "filter must be one of: all, complete, incomplete",
                    Some(json!({ "filter": raw })),
                )
            }
        },
    };
    let query = req.params.get("query").and_then(|v| v.as_str()).unwrap_or("");
    let (roster, _) = current_roster(conn);
    let rows: Vec<serde_json::Value> = roster
        .filter_students(filter, query)
        .into_iter()
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "complete": roster.student_complete(s),
                "total": roster.student_total(s)
            })
        })
        .collect();
    ok(&req.id, json!({ "students": rows }))
}

fn handle_roster_generate_links(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lang = match reports::parse_lang(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let links_cfg = setup::link_config(state);
    let (roster, _) = current_roster(conn);
    match roster.generate_links(lang, &links_cfg) {
        Ok(links) => ok(&req.id, json!({ "links": links })),
        Err(LinkError::Invalid(errors)) => err(
            &req.id,
            "invalid_roster",
            "fix the highlighted fields before generating links",
            Some(json!({ "errors": errors })),
        ),
        Err(LinkError::Codec(e)) => err(&req.id, "serialize_failed", e.to_string(), None),
    }
}

fn handle_roster_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let text = match required_str(req, "text") {
        Ok(v) => v,
        Err(e) => return e,
    };
    edit_roster(state, req, |roster| {
        let imported = import::parse_roster_csv(&text)
            .map_err(|e| err(&req.id, "import_failed", e.to_string(), None))?;
        roster.exam_sections = imported.sections;
        roster.students = imported.students;
        Ok(json!({}))
    })
}

fn handle_roster_import_xlsx(state: &mut AppState, req: &Request) -> serde_json::Value {
    let bytes = if let Some(data) = req.params.get("data").and_then(|v| v.as_str()) {
        match general_purpose::STANDARD.decode(data.trim()) {
            Ok(b) => b,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("data must be base64: {}", e),
                    None,
                )
            }
        }
    } else if let Some(path) = req.params.get("path").and_then(|v| v.as_str()) {
        match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                return err(
                    &req.id,
                    "import_failed",
                    format!("failed to read workbook: {}", e),
                    Some(json!({ "path": path })),
                )
            }
        }
    } else {
        return err(&req.id, "bad_params", "missing data or path", None);
    };
    edit_roster(state, req, |roster| {
        let imported = import::parse_roster_xlsx(&bytes)
            .map_err(|e| err(&req.id, "import_failed", format!("{:#}", e), None))?;
        roster.exam_sections = imported.sections;
        roster.students = imported.students;
        Ok(json!({}))
    })
}

fn handle_sections_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(name) = req.params.get("name").and_then(model::parse_multilingual) else {
        return err(&req.id, "bad_params", "name must be { de, ar }", None);
    };
    let weight = model::finite_number(req.params.get("weight")).unwrap_or(0.0);
    edit_roster(state, req, |roster| {
        let key = roster.add_section(name, weight);
        Ok(json!({ "key": key }))
    })
}

fn handle_sections_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match req.params.get("name") {
        None => None,
        Some(v) => match model::parse_multilingual(v) {
            Some(n) => Some(n),
            None => return err(&req.id, "bad_params", "name must be { de, ar }", None),
        },
    };
    let weight = match req.params.get("weight") {
        None => None,
        Some(v) => match v.as_f64() {
            Some(w) => Some(w),
            None => return err(&req.id, "bad_params", "weight must be a number", None),
        },
    };
    edit_roster(state, req, |roster| {
        if roster.section(&key).is_none() {
            return Err(err(&req.id, "not_found", "section not found", None));
        }
        if let Some(name) = name {
            roster.rename_section(&key, name);
        }
        if let Some(w) = weight {
            roster.set_section_weight(&key, w);
        }
        Ok(json!({}))
    })
}

fn handle_sections_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e,
    };
    edit_roster(state, req, |roster| {
        if !roster.remove_section(&key) {
            return Err(err(&req.id, "not_found", "section not found", None));
        }
        Ok(json!({}))
    })
}

fn handle_sections_equalize(state: &mut AppState, req: &Request) -> serde_json::Value {
    edit_roster(state, req, |roster| {
        let weights = roster::equal_weights(roster.exam_sections.len());
        for (section, w) in roster.exam_sections.iter_mut().zip(weights) {
            section.weight = w;
        }
        Ok(json!({}))
    })
}

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let name = req.params.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let gender = match req.params.get("gender").and_then(|v| v.as_str()) {
        None => Gender::Male,
        Some(raw) => match Gender::parse(raw) {
            Some(g) => g,
            None => return err(&req.id, "bad_params", "gender must be one of: f, m", None),
        },
    };
    let notes = req.params.get("notes").and_then(|v| v.as_str()).map(|s| s.to_string());
    edit_roster(state, req, |roster| {
        let id = roster.add_student(&name, gender, notes);
        Ok(json!({ "id": id }))
    })
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut update = StudentUpdate::default();
    if let Some(v) = req.params.get("name") {
        let Some(name) = v.as_str() else {
            return err(&req.id, "bad_params", "name must be string", None);
        };
        update.name = Some(name.to_string());
    }
    if let Some(v) = req.params.get("gender") {
        let Some(gender) = v.as_str().and_then(Gender::parse) else {
            return err(&req.id, "bad_params", "gender must be one of: f, m", None);
        };
        update.gender = Some(gender);
    }
    match req.params.get("notes") {
        None => {}
        Some(serde_json::Value::Null) => update.notes = Some(None),
        Some(v) => match v.as_str() {
            Some(notes) => update.notes = Some(Some(notes.to_string())),
            None => return err(&req.id, "bad_params", "notes must be string or null", None),
        },
    }
    match req.params.get("attendance") {
        None => {}
        Some(serde_json::Value::Null) => update.attendance = Some(None),
        Some(v) => match model::parse_attendance(v) {
            Some(a) => update.attendance = Some(Some(a)),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "attendance must be { attended, total } with non-negative integers",
                    None,
                )
            }
        },
    }
    edit_roster(state, req, |roster| {
        if !roster.update_student(&id, update) {
            return Err(err(&req.id, "not_found", "student not found", None));
        }
        Ok(json!({}))
    })
}

fn handle_students_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    edit_roster(state, req, |roster| {
        if !roster.remove_student(&id) {
            return Err(err(&req.id, "not_found", "student not found", None));
        }
        Ok(json!({}))
    })
}

/// `value` is the raw grade cell: a string as typed, a number, or null to clear.
fn handle_grades_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section_key = match required_str(req, "sectionKey") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade = match req.params.get("value") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => match roster::parse_grade_input(s) {
            Ok(g) => g,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
        Some(v) => match model::finite_number(Some(v)) {
            Some(g) => Some(g),
            None => return err(&req.id, "bad_params", "value must be a number or string", None),
        },
    };
    edit_roster(state, req, |roster| {
        if !roster.set_grade(&student_id, &section_key, grade) {
            return Err(err(&req.id, "not_found", "student or section not found", None));
        }
        let complete = roster
            .student(&student_id)
            .map(|s| roster.student_complete(s))
            .unwrap_or(false);
        Ok(json!({ "complete": complete }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.load" => Some(handle_roster_load(state, req)),
        "roster.save" => Some(handle_roster_save(state, req)),
        "roster.clear" => Some(handle_roster_clear(state, req)),
        "roster.reset" => Some(handle_roster_reset(state, req)),
        "roster.update" => Some(handle_roster_update(state, req)),
        "roster.validate" => Some(handle_roster_validate(state, req)),
        "roster.filter" => Some(handle_roster_filter(state, req)),
        "roster.generateLinks" => Some(handle_roster_generate_links(state, req)),
        "roster.importCsv" => Some(handle_roster_import_csv(state, req)),
        "roster.importXlsx" => Some(handle_roster_import_xlsx(state, req)),
        "roster.sections.add" => Some(handle_sections_add(state, req)),
        "roster.sections.update" => Some(handle_sections_update(state, req)),
        "roster.sections.remove" => Some(handle_sections_remove(state, req)),
        "roster.sections.equalize" => Some(handle_sections_equalize(state, req)),
        "roster.students.add" => Some(handle_students_add(state, req)),
        "roster.students.update" => Some(handle_students_update(state, req)),
        "roster.students.remove" => Some(handle_students_remove(state, req)),
        "roster.grades.set" => Some(handle_grades_set(state, req)),
        _ => None,
    }
}
