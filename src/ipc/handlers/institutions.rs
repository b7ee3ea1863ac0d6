use crate::db;
use crate::ipc::error::{err, failed, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_institutions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "institutions": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           i.id,
           i.name,
           (SELECT COUNT(*) FROM classes c WHERE c.institution_id = i.id) AS class_count
         FROM institutions i
         ORDER BY i.name",
    ) {
        Ok(s) => s,
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memuat data lembaga", e),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let class_count: i64 = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "classCount": class_count }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(institutions) => ok(&req.id, json!({ "institutions": institutions })),
        Err(e) => failed(&req.id, "db_query_failed", "Gagal memuat data lembaga", e),
    }
}

fn handle_institutions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match required_str(&req.params, "name") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let taken: Option<String> = match conn
        .query_row(
            "SELECT id FROM institutions WHERE name = ?",
            [&name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memeriksa lembaga", e),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "duplicate",
            format!("Lembaga '{}' sudah ada", name),
            None,
        );
    }

    let institution_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO institutions(id, name, created_at) VALUES(?, ?, ?)",
        (&institution_id, &name, db::now_rfc3339()),
    ) {
        return failed(&req.id, "db_insert_failed", "Gagal menyimpan lembaga", e);
    }

    ok(
        &req.id,
        json!({ "institutionId": institution_id, "name": name }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "institutions.list" => Some(handle_institutions_list(state, req)),
        "institutions.create" => Some(handle_institutions_create(state, req)),
        _ => None,
    }
}
