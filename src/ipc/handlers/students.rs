use crate::db;
use crate::ipc::error::{err, failed, ok};
use crate::ipc::helpers::{nullable_str, optional_str, required_str, revalidate, Patch};
use crate::ipc::types::{AppState, Request};
use crate::promotion::{self, StudentStatus};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let class_id = optional_str(&req.params, "classId");
    let institution_id = optional_str(&req.params, "institutionId");
    let status = match optional_str(&req.params, "status") {
        None => None,
        Some(raw) => match StudentStatus::parse(raw) {
            Some(s) => Some(s.as_str()),
            None => return err(&req.id, "bad_params", format!("unknown status: {}", raw), None),
        },
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.nis, s.name, s.status, c.id, c.name, i.id, i.name
         FROM students s
         LEFT JOIN classes c ON c.id = s.class_id
         LEFT JOIN institutions i ON i.id = c.institution_id
         WHERE (?1 IS NULL OR s.class_id = ?1)
           AND (?2 IS NULL OR c.institution_id = ?2)
           AND (?3 IS NULL OR s.status = ?3)
         ORDER BY i.name, c.name, s.name, s.nis",
    ) {
        Ok(s) => s,
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memuat data santri", e),
    };
    let rows = stmt
        .query_map(
            (class_id, institution_id, status),
            promotion::student_record_from_row,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => failed(&req.id, "db_query_failed", "Gagal memuat data santri", e),
    }
}

fn nis_taken(
    conn: &rusqlite::Connection,
    nis: &str,
    except_id: Option<&str>,
) -> rusqlite::Result<bool> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM students WHERE nis = ?", [nis], |r| r.get(0))
        .optional()?;
    Ok(match found {
        Some(id) => Some(id.as_str()) != except_id,
        None => false,
    })
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let nis = match required_str(&req.params, "nis") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let name = match required_str(&req.params, "name") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let class_id = optional_str(&req.params, "classId").map(|s| s.to_string());

    match nis_taken(conn, &nis, None) {
        Ok(false) => {}
        Ok(true) => {
            return err(&req.id, "duplicate", format!("NIS '{}' sudah terdaftar", nis), None)
        }
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memeriksa NIS", e),
    }
    if let Some(cid) = class_id.as_deref() {
        match promotion::class_exists(conn, cid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "Kelas tidak ditemukan", None),
            Err(e) => return failed(&req.id, "db_query_failed", "Gagal memeriksa kelas", e),
        }
    }

    let student_id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    let class_since = class_id.as_ref().map(|_| now.clone());
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, nis, name, status, class_id, class_since, created_at, updated_at)
         VALUES(?, ?, ?, 'ACTIVE', ?, ?, ?, ?)",
        (&student_id, &nis, &name, &class_id, &class_since, &now, &now),
    ) {
        return failed(&req.id, "db_insert_failed", "Gagal menyimpan santri", e);
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "revalidate": revalidate(&["students", "classes", "promotion"])
        }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let current: Option<Option<String>> = match conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memuat santri", e),
    };
    let Some(current_class) = current else {
        return err(&req.id, "not_found", "Santri tidak ditemukan", None);
    };

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();

    if req.params.get("nis").is_some() {
        let nis = match required_str(&req.params, "nis") {
            Ok(v) => v,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        };
        match nis_taken(conn, &nis, Some(&student_id)) {
            Ok(false) => {}
            Ok(true) => {
                return err(&req.id, "duplicate", format!("NIS '{}' sudah terdaftar", nis), None)
            }
            Err(e) => return failed(&req.id, "db_query_failed", "Gagal memeriksa NIS", e),
        }
        sets.push("nis = ?");
        values.push(nis.into());
    }
    if req.params.get("name").is_some() {
        let name = match required_str(&req.params, "name") {
            Ok(v) => v,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        };
        sets.push("name = ?");
        values.push(name.into());
    }
    if let Some(raw) = req.params.get("status") {
        let Some(status) = raw.as_str().and_then(StudentStatus::parse) else {
            return err(&req.id, "bad_params", "status must be one of: ACTIVE, ALUMNI, KELUAR, PINDAH", None);
        };
        sets.push("status = ?");
        values.push(status.as_str().to_string().into());
    }

    let now = db::now_rfc3339();
    match nullable_str(&req.params, "classId") {
        Ok(Patch::Unchanged) => {}
        Ok(Patch::Clear) => {
            sets.push("class_id = NULL");
            sets.push("class_since = NULL");
        }
        Ok(Patch::Set(cid)) => {
            match promotion::class_exists(conn, &cid) {
                Ok(true) => {}
                Ok(false) => return err(&req.id, "not_found", "Kelas tidak ditemukan", None),
                Err(e) => return failed(&req.id, "db_query_failed", "Gagal memeriksa kelas", e),
            }
            if current_class.as_deref() != Some(cid.as_str()) {
                sets.push("class_id = ?");
                values.push(cid.into());
                sets.push("class_since = ?");
                values.push(now.clone().into());
            }
        }
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }

    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }
    sets.push("updated_at = ?");
    values.push(now.into());
    values.push(student_id.clone().into());

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return failed(&req.id, "db_update_failed", "Gagal memperbarui santri", e);
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "revalidate": revalidate(&["students", "classes", "promotion"])
        }),
    )
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return failed(&req.id, "db_tx_failed", "Gagal menghapus santri", e),
    };
    // No ON DELETE CASCADE; history goes first.
    let history_deleted = match tx.execute(
        "DELETE FROM class_history WHERE student_id = ?",
        [&student_id],
    ) {
        Ok(n) => n,
        Err(e) => return failed(&req.id, "db_delete_failed", "Gagal menghapus santri", e),
    };
    let deleted = match tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => return failed(&req.id, "db_delete_failed", "Gagal menghapus santri", e),
    };
    if deleted == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "Santri tidak ditemukan", None);
    }
    if let Err(e) = tx.commit() {
        return failed(&req.id, "db_commit_failed", "Gagal menghapus santri", e);
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "historyDeleted": history_deleted,
            "revalidate": revalidate(&["students", "classes", "promotion"])
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
