mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn room_count(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
) -> usize {
    let list = request_ok(stdin, reader, id, "rooms.list", json!({}));
    list.get("rooms")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0)
}

#[test]
fn any_row_error_rejects_the_whole_file() {
    let workspace = temp_dir("rollcalld-rooms-csv-reject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let csv = "name,building,floor,capacity\nRoom 101,Main,1,30\n,Main,2,20\nLab,East,150,20\n";
    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "rooms.importCsv",
        json!({ "csv": csv }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("validation_failed"));
    assert_eq!(
        e.pointer("/details/errors"),
        Some(&json!(["Row 4: floor must be between -10 and 100"]))
    );
    assert_eq!(room_count(&mut stdin, &mut reader, "3"), 0);

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "rooms.importCsv",
        json!({ "csv": "building,floor\nMain,1\n" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("validation_failed"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "rooms.create",
        json!({ "name": "Closet", "capacity": 0 }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("validation_failed"));
    assert_eq!(
        e.pointer("/details/errors/0").and_then(|v| v.as_str()),
        Some("capacity must be between 1 and 1000")
    );
}

#[test]
fn valid_file_imports_and_exports() {
    let workspace = temp_dir("rollcalld-rooms-csv-import");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let csv = "name,building,floor,capacity\nRoom 101,Main,1,30\n,Main,2,20\nGym,,,\n";
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "rooms.importCsv",
        json!({ "csv": csv }),
    );
    assert_eq!(res.get("inserted").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(res.get("skipped").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(room_count(&mut stdin, &mut reader, "3"), 2);

    // A name already on file fails the insert and rolls the batch back.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "rooms.importCsv",
        json!({ "csv": "name\nLibrary\nGym\n" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("db_insert_failed"));
    assert_eq!(room_count(&mut stdin, &mut reader, "5"), 2);

    let exported = request_ok(&mut stdin, &mut reader, "6", "rooms.exportCsv", json!({}));
    let text = exported.get("csv").and_then(|v| v.as_str()).expect("csv");
    assert!(text.starts_with("name,building,floor,capacity\n"));
    assert!(text.contains("Room 101,Main,1,30\n"));
    assert!(text.contains("Gym,,,\n"));
    assert_eq!(exported.get("rowsExported").and_then(|v| v.as_u64()), Some(2));

    let out_path = workspace.join("rooms-export.csv");
    let written = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "rooms.exportCsv",
        json!({ "outPath": out_path.to_string_lossy() }),
    );
    assert_eq!(written.get("rowsExported").and_then(|v| v.as_u64()), Some(2));
    let on_disk = std::fs::read_to_string(&out_path).expect("read export");
    assert_eq!(on_disk, text);
}
