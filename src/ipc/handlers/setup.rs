use crate::certificate::CertificateOptions;
use crate::codec::LinkConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::Lang;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Links,
    Certificate,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "links" => Some(Self::Links),
            "certificate" => Some(Self::Certificate),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Links => "setup.links",
            Self::Certificate => "setup.certificate",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Links => json!({
            "basePath": "",
            "periodSlug": "2024-2025-S1",
            "defaultLang": "ar"
        }),
        SetupSection::Certificate => json!({
            "showWeights": false,
            "showAttendance": true
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Links => match k.as_str() {
                "basePath" => {
                    let s = parse_string_max(v, k, 200)?;
                    if !s.is_empty() && !s.starts_with('/') && !s.contains("://") {
                        return Err("basePath must start with '/' or be an absolute URL".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "periodSlug" => {
                    let s = parse_string_max(v, k, 64)?;
                    let slug = s.trim_matches('/');
                    if slug.is_empty()
                        || !slug
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                    {
                        return Err("periodSlug must be letters, digits, '-' or '_'".into());
                    }
                    obj.insert(k.clone(), Value::String(slug.to_string()));
                }
                "defaultLang" => {
                    let s = parse_string_max(v, k, 4)?.to_ascii_lowercase();
                    if Lang::parse(&s).is_none() {
                        return Err("defaultLang must be one of: de, ar".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown links field: {}", k)),
            },
            SetupSection::Certificate => match k.as_str() {
                "showWeights" | "showAttendance" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown certificate field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: Option<&rusqlite::Connection>, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    let Some(conn) = conn else {
        return Ok(current);
    };
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Apply field by field so one bad historical value keeps the rest.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                if let Err(msg) = merge_section_patch(section, &mut current, &one) {
                    tracing::warn!(section = section.key(), field = %k, %msg, "ignoring stored setting");
                }
            }
        }
    }
    Ok(current)
}

/// Section values with defaults filled in. Read failures fall back to the
/// defaults; links and certificates keep working without a workspace.
fn section_or_default(state: &AppState, section: SetupSection) -> Value {
    load_section(state.db.as_ref(), section).unwrap_or_else(|e| {
        tracing::warn!(section = section.key(), error = %e, "failed to load settings");
        default_section(section)
    })
}

pub fn link_config(state: &AppState) -> LinkConfig {
    let links = section_or_default(state, SetupSection::Links);
    let defaults = LinkConfig::default();
    LinkConfig {
        base_path: links
            .get("basePath")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or(defaults.base_path),
        period_slug: links
            .get("periodSlug")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or(defaults.period_slug),
    }
}

pub fn default_lang(state: &AppState) -> Lang {
    section_or_default(state, SetupSection::Links)
        .get("defaultLang")
        .and_then(|v| v.as_str())
        .and_then(Lang::parse)
        .unwrap_or(Lang::Ar)
}

pub fn certificate_options(state: &AppState) -> CertificateOptions {
    let cert = section_or_default(state, SetupSection::Certificate);
    let defaults = CertificateOptions::default();
    CertificateOptions {
        show_weights: cert
            .get("showWeights")
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.show_weights),
        show_attendance: cert
            .get("showAttendance")
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.show_attendance),
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = state.db.as_ref();
    let links = match load_section(conn, SetupSection::Links) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let certificate = match load_section(conn, SetupSection::Certificate) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "links": links,
            "certificate": certificate
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(Some(conn), section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "section": section_raw, "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
