use crate::ipc::error::{err, failed, ok};
use crate::ipc::helpers::{nullable_str, optional_str, required_str, revalidate, Patch};
use crate::ipc::types::{AppState, Request};
use crate::promotion;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    let institution_id = optional_str(&req.params, "institutionId");

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           i.id,
           i.name,
           c.next_class_id,
           n.name,
           (SELECT COUNT(*) FROM students s
             WHERE s.class_id = c.id AND s.status = 'ACTIVE') AS active_count,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         JOIN institutions i ON i.id = c.institution_id
         LEFT JOIN classes n ON n.id = c.next_class_id
         WHERE (?1 IS NULL OR c.institution_id = ?1)
         ORDER BY i.name, c.name",
    ) {
        Ok(s) => s,
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memuat data kelas", e),
    };

    let rows = stmt
        .query_map([institution_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let institution_id: String = row.get(2)?;
            let institution_name: String = row.get(3)?;
            let next_class_id: Option<String> = row.get(4)?;
            let next_class_name: Option<String> = row.get(5)?;
            let active_count: i64 = row.get(6)?;
            let student_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "name": name,
                "institutionId": institution_id,
                "institutionName": institution_name,
                "nextClassId": next_class_id,
                "nextClassName": next_class_name,
                "activeStudentCount": active_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => failed(&req.id, "db_query_failed", "Gagal memuat data kelas", e),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match required_str(&req.params, "name") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let institution_id = match required_str(&req.params, "institutionId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let next_class_id = match nullable_str(&req.params, "nextClassId") {
        Ok(Patch::Set(v)) => Some(v),
        Ok(_) => None,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let institution: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM institutions WHERE id = ?",
            [&institution_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memeriksa lembaga", e),
    };
    if institution.is_none() {
        return err(&req.id, "not_found", "Lembaga tidak ditemukan", None);
    }
    if let Some(next) = next_class_id.as_deref() {
        if let Err(e) = promotion::check_next_class(conn, None, next) {
            return err(&req.id, e.code(), e.to_string(), None);
        }
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, institution_id, next_class_id) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &institution_id, &next_class_id),
    ) {
        return failed(&req.id, "db_insert_failed", "Gagal menyimpan kelas", e);
    }

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "name": name,
            "revalidate": revalidate(&["classes", "promotion"])
        }),
    )
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    match promotion::class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Kelas tidak ditemukan", None),
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memeriksa kelas", e),
    }

    let name = match req.params.get("name") {
        None => None,
        Some(_) => match required_str(&req.params, "name") {
            Ok(v) => Some(v),
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
    };
    let next = match nullable_str(&req.params, "nextClassId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    if let Patch::Set(next_id) = &next {
        if let Err(e) = promotion::check_next_class(conn, Some(&class_id), next_id) {
            return err(&req.id, e.code(), e.to_string(), None);
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return failed(&req.id, "db_tx_failed", "Gagal memperbarui kelas", e),
    };
    if let Some(name) = &name {
        if let Err(e) = tx.execute("UPDATE classes SET name = ? WHERE id = ?", (name, &class_id)) {
            return failed(&req.id, "db_update_failed", "Gagal memperbarui kelas", e);
        }
    }
    let next_value = match next {
        Patch::Unchanged => None,
        Patch::Clear => Some(None),
        Patch::Set(v) => Some(Some(v)),
    };
    if let Some(next_value) = &next_value {
        if let Err(e) = tx.execute(
            "UPDATE classes SET next_class_id = ? WHERE id = ?",
            (next_value, &class_id),
        ) {
            return failed(&req.id, "db_update_failed", "Gagal memperbarui kelas", e);
        }
    }
    if let Err(e) = tx.commit() {
        return failed(&req.id, "db_commit_failed", "Gagal memperbarui kelas", e);
    }

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "revalidate": revalidate(&["classes", "promotion"])
        }),
    )
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match promotion::class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Kelas tidak ditemukan", None),
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memeriksa kelas", e),
    }

    let usage: Result<(i64, i64), rusqlite::Error> = conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM students WHERE class_id = ?1),
           (SELECT COUNT(*) FROM class_history WHERE class_id = ?1)",
        [&class_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    );
    let (student_count, history_count) = match usage {
        Ok(v) => v,
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memeriksa kelas", e),
    };
    if student_count > 0 || history_count > 0 {
        return err(
            &req.id,
            "class_in_use",
            "Kelas masih memiliki santri atau riwayat kenaikan kelas",
            Some(json!({ "studentCount": student_count, "historyCount": history_count })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return failed(&req.id, "db_tx_failed", "Gagal menghapus kelas", e),
    };

    // Classes that advanced into this one become terminal.
    if let Err(e) = tx.execute(
        "UPDATE classes SET next_class_id = NULL WHERE next_class_id = ?",
        [&class_id],
    ) {
        return failed(&req.id, "db_update_failed", "Gagal menghapus kelas", e);
    }
    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        return failed(&req.id, "db_delete_failed", "Gagal menghapus kelas", e);
    }
    if let Err(e) = tx.commit() {
        return failed(&req.id, "db_commit_failed", "Gagal menghapus kelas", e);
    }

    ok(
        &req.id,
        json!({ "ok": true, "revalidate": revalidate(&["classes", "promotion"]) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
