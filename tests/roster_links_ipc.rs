mod test_support;

use serde_json::json;
use test_support::{request, request_err_code, request_ok, spawn_sidecar, temp_dir};

#[test]
fn grading_session_produces_decodable_links() {
    let workspace = temp_dir("zeugnis-roster-links");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let loaded = request_ok(&mut stdin, &mut reader, "2", "roster.load", json!({}));
    assert_eq!(loaded["stored"], json!(false));
    let sections = loaded["roster"]["examSections"].as_array().cloned().expect("sections");
    assert_eq!(sections.len(), 3);
    let keys: Vec<String> = sections
        .iter()
        .map(|s| s["key"].as_str().expect("section key").to_string())
        .collect();

    // Empty class name and no students yet.
    let resp = request(&mut stdin, &mut reader, "3", "roster.generateLinks", json!({ "lang": "de" }));
    assert_eq!(resp["error"]["code"], json!("invalid_roster"));
    assert!(resp["error"]["details"]["errors"]["classroom"].is_string());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "roster.update",
        json!({ "classroom": "Klasse 6", "schoolYear": "2024-2025", "examDate": "2024-12-20" }),
    );
    let added = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "roster.students.add",
        json!({ "name": "Amina", "gender": "f" }),
    );
    let student_id = added["id"].as_str().expect("student id").to_string();

    let validate = request_ok(&mut stdin, &mut reader, "6", "roster.validate", json!({ "lang": "de" }));
    assert_eq!(validate["valid"], json!(false));
    let grade_field = format!("grade-{}-{}", student_id, keys[0]);
    assert_eq!(validate["errors"][&grade_field], json!("Pflichtfeld"));

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "roster.grades.set",
        json!({ "studentId": student_id, "sectionKey": keys[0], "value": "1.25" }),
    );
    assert_eq!(code, "bad_params");

    let values = [json!("1,0"), json!("2"), json!(2.0)];
    let mut last = None;
    for (i, (key, value)) in keys.iter().zip(values).enumerate() {
        last = Some(request_ok(
            &mut stdin,
            &mut reader,
            &format!("g{}", i),
            "roster.grades.set",
            json!({ "studentId": student_id, "sectionKey": key, "value": value }),
        ));
    }
    assert_eq!(last.expect("grades set")["complete"], json!(true));

    let filtered = request_ok(&mut stdin, &mut reader, "7a", "roster.filter", json!({}));
    // 40 * 1.0 + 35 * 2.0 + 25 * 2.0 = 160
    assert_eq!(filtered["students"][0]["total"], json!(1.6));
    assert_eq!(filtered["students"][0]["complete"], json!(true));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "7b",
        "roster.students.update",
        json!({
            "id": student_id,
            "notes": "Sehr fleißig",
            "attendance": { "attended": 19, "total": 20 }
        }),
    );
    assert_eq!(updated["roster"]["students"][0]["name"], json!("Amina"));
    assert_eq!(updated["roster"]["students"][0]["gender"], json!("f"));
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7c",
        "roster.students.update",
        json!({ "id": student_id, "attendance": { "attended": -1, "total": 20 } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7d",
        "roster.students.update",
        json!({ "id": "nobody", "name": "X" }),
    );
    assert_eq!(code, "not_found");

    let links = request_ok(&mut stdin, &mut reader, "8", "roster.generateLinks", json!({ "lang": "de" }));
    let links = links["links"].as_array().cloned().expect("links");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0]["studentName"], json!("Amina"));
    let token = links[0]["token"].as_str().expect("token").to_string();
    assert_eq!(
        links[0]["url"].as_str(),
        Some(format!("/de/2024-2025-S1?g={}", token).as_str())
    );
    assert!(token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

    let decoded = request_ok(&mut stdin, &mut reader, "9", "report.decompress", json!({ "token": token }));
    let report = &decoded["report"];
    assert_eq!(report["studentName"], json!("Amina"));
    assert_eq!(report["classroom"], json!("Klasse 6"));
    assert_eq!(report["gender"], json!("f"));
    assert_eq!(report["examSections"][0]["grade"], json!(1.0));
    assert_eq!(report["examSections"][2]["grade"], json!(2.0));
    assert_eq!(report["notes"], json!("Sehr fleißig"));
    assert_eq!(report["attendance"], json!({ "attended": 19, "total": 20 }));

    let resolved = request_ok(&mut stdin, &mut reader, "10", "report.resolve", json!({ "g": token }));
    assert_eq!(resolved["usedDefault"], json!(false));
    assert_eq!(&resolved["report"], report);

    let cert = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "certificate.model",
        json!({ "g": token, "lang": "de", "showWeights": true }),
    );
    // 40 * 1.0 + 35 * 2.0 + 25 * 2.0 = 160
    assert_eq!(cert["model"]["total"], json!("1.6"));
    assert_eq!(cert["model"]["labels"]["studentName"], json!("Name der Schülerin"));
    assert_eq!(cert["model"]["fileName"], json!("report_klasse-6_amina_2024-12-20.pdf"));

    let cert = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "certificate.model",
        json!({ "g": token, "lang": "ar" }),
    );
    // (1.0 + 2.0 + 2.0) / 3
    assert_eq!(cert["model"]["total"], json!("1.7"));

    let _ = child.kill();
}

#[test]
fn session_survives_restart_and_clear_forgets_it() {
    let workspace = temp_dir("zeugnis-roster-session");

    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "roster.students.add",
            json!({ "name": "Omar" }),
        );
        let _ = child.kill();
        let _ = child.wait();
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let loaded = request_ok(&mut stdin, &mut reader, "2", "roster.load", json!({}));
    assert_eq!(loaded["stored"], json!(true));
    assert_eq!(loaded["roster"]["students"][0]["name"], json!("Omar"));
    assert_eq!(loaded["roster"]["students"][0]["gender"], json!("m"));

    let filtered = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.filter",
        json!({ "filter": "incomplete", "query": "OM" }),
    );
    assert_eq!(filtered["students"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(filtered["students"][0]["complete"], json!(false));

    let _ = request_ok(&mut stdin, &mut reader, "4", "roster.clear", json!({}));
    let loaded = request_ok(&mut stdin, &mut reader, "5", "roster.load", json!({}));
    assert_eq!(loaded["stored"], json!(false));
    assert_eq!(loaded["roster"]["students"], json!([]));

    let reset = request_ok(&mut stdin, &mut reader, "6", "roster.reset", json!({}));
    assert_eq!(reset["roster"]["examSections"].as_array().map(|a| a.len()), Some(3));
    let loaded = request_ok(&mut stdin, &mut reader, "7", "roster.load", json!({}));
    assert_eq!(loaded["stored"], json!(true));

    let _ = child.kill();
}
