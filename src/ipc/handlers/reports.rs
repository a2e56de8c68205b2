use crate::calc::{self, TotalMode};
use crate::certificate::{self, CertificateOptions};
use crate::codec;
use crate::defaults;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Lang, ReportData};
use serde_json::json;

use super::setup;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be boolean", key), None)),
    }
}

/// `lang` param, falling back to the configured default language.
pub(super) fn parse_lang(state: &AppState, req: &Request) -> Result<Lang, serde_json::Value> {
    match optional_str(req, "lang") {
        None => Ok(setup::default_lang(state)),
        Some(raw) => Lang::parse(raw).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "lang must be one of: de, ar",
                Some(json!({ "lang": raw })),
            )
        }),
    }
}

fn parse_report_param(req: &Request) -> Result<ReportData, serde_json::Value> {
    let Some(raw) = req.params.get("report") else {
        return Err(err(&req.id, "bad_params", "missing report", None));
    };
    model::validate_report_value(raw)
        .ok_or_else(|| err(&req.id, "bad_params", "report has the wrong shape", None))
}

fn request_date(req: &Request) -> chrono::NaiveDate {
    defaults::parse_date_or(optional_str(req, "date"), defaults::today())
}

fn handle_report_compress(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let report = match parse_report_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match codec::compress(&report) {
        Ok(token) => ok(&req.id, json!({ "token": token })),
        Err(e) => err(&req.id, "serialize_failed", e.to_string(), None),
    }
}

fn handle_report_decompress(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let token = match required_str(req, "token") {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(&req.id, json!({ "report": codec::decompress(&token) }))
}

fn handle_report_resolve(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let decoded = optional_str(req, "g").and_then(codec::decompress);
    let used_default = decoded.is_none();
    let report = decoded.unwrap_or_else(|| defaults::default_report(request_date(req)));
    ok(
        &req.id,
        json!({
            "report": report,
            "usedDefault": used_default
        }),
    )
}

fn handle_report_defaults(_state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "report": defaults::default_report(request_date(req)),
            "examSections": defaults::default_exam_sections()
        }),
    )
}

fn handle_grades_total(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(sections) = req.params.get("sections").and_then(model::validate_sections_value) else {
        return err(
            &req.id,
            "bad_params",
            "sections must be an array of { name, weight, grade? }",
            None,
        );
    };
    let mode = match optional_str(req, "mode") {
        None => TotalMode::default(),
        Some(raw) => match TotalMode::parse(raw) {
            Some(m) => m,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "mode must be one of: weighted, simple",
                    Some(json!({ "mode": raw })),
                )
            }
        },
    };
    ok(
        &req.id,
        json!({
            "total": calc::total_grade(&sections, mode),
            "complete": calc::sections_complete(&sections),
            "weightTotal": calc::weight_total(&sections)
        }),
    )
}

fn handle_certificate_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let lang = match parse_lang(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut opts: CertificateOptions = setup::certificate_options(state);
    match optional_bool(req, "showWeights") {
        Ok(Some(v)) => opts.show_weights = v,
        Ok(None) => {}
        Err(e) => return e,
    }
    match optional_bool(req, "showAttendance") {
        Ok(Some(v)) => opts.show_attendance = v,
        Ok(None) => {}
        Err(e) => return e,
    }

    let default = defaults::default_report(request_date(req));
    let report = if req.params.get("report").is_some() {
        match parse_report_param(req) {
            Ok(r) => r,
            Err(e) => return e,
        }
    } else {
        codec::resolve_report(optional_str(req, "g"), &default)
    };
    // A token carrying the sample itself renders exactly like no token.
    let is_default = report == default;

    let links = setup::link_config(state);
    let model = certificate::certificate_model(&report, lang, opts, &links, is_default);
    ok(&req.id, json!({ "model": model, "usedDefault": is_default }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.compress" => Some(handle_report_compress(state, req)),
        "report.decompress" => Some(handle_report_decompress(state, req)),
        "report.resolve" => Some(handle_report_resolve(state, req)),
        "report.defaults" => Some(handle_report_defaults(state, req)),
        "grades.total" => Some(handle_grades_total(state, req)),
        "certificate.model" => Some(handle_certificate_model(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, params: serde_json::Value) -> Request {
        Request {
            id: "1".to_string(),
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn grades_total_defaults_to_weighted() {
        let mut state = AppState::default();
        let sections = json!([
            { "name": { "de": "A", "ar": "أ" }, "weight": 50, "grade": 1.0 },
            { "name": { "de": "B", "ar": "ب" }, "weight": 50, "grade": 2.0 }
        ]);
        let resp = try_handle(&mut state, &request("grades.total", json!({ "sections": sections })))
            .expect("handled");
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["result"]["total"], json!(1.5));
        assert_eq!(resp["result"]["complete"], json!(true));
        assert_eq!(resp["result"]["weightTotal"], json!(100.0));
    }

    #[test]
    fn grades_total_reports_null_for_incomplete_sections() {
        let mut state = AppState::default();
        let sections = json!([
            { "name": { "de": "A", "ar": "أ" }, "weight": 100, "grade": 7.0 }
        ]);
        let resp = try_handle(
            &mut state,
            &request("grades.total", json!({ "sections": sections, "mode": "simple" })),
        )
        .expect("handled");
        assert_eq!(resp["result"]["total"], json!(null));
        assert_eq!(resp["result"]["complete"], json!(false));

        let resp = try_handle(
            &mut state,
            &request("grades.total", json!({ "sections": sections, "mode": "median" })),
        )
        .expect("handled");
        assert_eq!(resp["error"]["code"], json!("bad_params"));
    }

    #[test]
    fn resolve_falls_back_to_dated_default() {
        let mut state = AppState::default();
        let resp = try_handle(
            &mut state,
            &request("report.resolve", json!({ "g": "garbage", "date": "2025-01-31" })),
        )
        .expect("handled");
        assert_eq!(resp["result"]["usedDefault"], json!(true));
        assert_eq!(resp["result"]["report"]["date"], json!("2025-01-31"));
    }

    #[test]
    fn compress_rejects_wrong_shape() {
        let mut state = AppState::default();
        let resp = try_handle(
            &mut state,
            &request("report.compress", json!({ "report": { "gender": "x" } })),
        )
        .expect("handled");
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("bad_params"));
    }

    #[test]
    fn compress_returns_a_decodable_token() {
        let mut state = AppState::default();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 12, 20).expect("date");
        let report = defaults::default_report(date);
        let resp = try_handle(
            &mut state,
            &request("report.compress", json!({ "report": report })),
        )
        .expect("handled");
        let token = resp["result"]["token"].as_str().expect("token");
        assert_eq!(codec::decompress(token), Some(report));
    }

    #[test]
    fn sample_token_renders_like_no_token() {
        let mut state = AppState::default();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 12, 20).expect("date");
        let token = codec::compress(&defaults::default_report(date)).expect("compress");

        let direct = try_handle(
            &mut state,
            &request("certificate.model", json!({ "lang": "de", "date": "2024-12-20" })),
        )
        .expect("handled");
        let via_token = try_handle(
            &mut state,
            &request(
                "certificate.model",
                json!({ "lang": "de", "date": "2024-12-20", "g": token }),
            ),
        )
        .expect("handled");
        assert_eq!(direct["result"]["model"]["switchLangHref"], json!("/ar/2024-2025-S1/"));
        assert_eq!(
            serde_json::to_string(&direct["result"]).expect("json"),
            serde_json::to_string(&via_token["result"]).expect("json")
        );
    }

    #[test]
    fn certificate_model_honours_overrides() {
        let mut state = AppState::default();
        let resp = try_handle(
            &mut state,
            &request(
                "certificate.model",
                json!({ "lang": "de", "showWeights": true, "date": "2024-12-20" }),
            ),
        )
        .expect("handled");
        assert_eq!(resp["result"]["usedDefault"], json!(true));
        let model = &resp["result"]["model"];
        assert_eq!(model["dir"], json!("ltr"));
        assert_eq!(model["showWeights"], json!(true));
        assert_eq!(model["total"], json!("1.5"));
        assert_eq!(model["switchLangHref"], json!("/ar/2024-2025-S1/"));

        let resp = try_handle(&mut state, &request("certificate.model", json!({ "lang": "fr" })))
            .expect("handled");
        assert_eq!(resp["error"]["code"], json!("bad_params"));
    }
}
