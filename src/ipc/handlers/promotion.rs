use crate::academic_year;
use crate::ipc::error::{err, failed, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{optional_str, required_str, revalidate, string_list};
use crate::ipc::types::{AppState, Request};
use crate::promotion::{self, Decision, HistoryFilter, PromotionError};
use rusqlite::Connection;
use serde_json::json;

const PROMOTION_VIEWS: [&str; 3] = ["students", "promotion", "classes"];

fn promotion_err(id: &str, fallback: &str, e: PromotionError) -> serde_json::Value {
    match e {
        PromotionError::Db(cause) => failed(id, "promotion_failed", fallback, cause),
        other => err(id, other.code(), other.to_string(), None),
    }
}

/// Canonical label from params, falling back to the configured current year.
fn resolve_academic_year(
    conn: &Connection,
    req: &Request,
    required: bool,
) -> Result<Option<String>, serde_json::Value> {
    let settings = match setup::load_promotion_settings(conn) {
        Ok(s) => s,
        Err(e) => {
            return Err(failed(
                &req.id,
                "db_query_failed",
                "Gagal memuat pengaturan kenaikan kelas",
                e,
            ))
        }
    };
    let raw = match optional_str(&req.params, "academicYear") {
        Some(v) => v.to_string(),
        None => match settings.current_academic_year {
            Some(v) => v,
            None if required => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "missing academicYear and no currentAcademicYear configured",
                    None,
                ))
            }
            None => return Ok(None),
        },
    };
    academic_year::canonicalize(&raw, settings.strict_academic_year)
        .map(Some)
        .map_err(|msg| {
            let e = PromotionError::InvalidAcademicYear(msg);
            err(&req.id, e.code(), e.to_string(), None)
        })
}

fn handle_promotion_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    let institution_id = optional_str(&req.params, "institutionId");
    match promotion::classes_for_promotion(conn, institution_id) {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => promotion_err(&req.id, "Gagal memuat data kelas", e),
    }
}

fn handle_promotion_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let academic_year = match resolve_academic_year(conn, req, true) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let institution_id = optional_str(&req.params, "institutionId");
    match promotion::promotion_preview(conn, institution_id) {
        Ok(rows) => ok(
            &req.id,
            json!({ "academicYear": academic_year, "preview": rows }),
        ),
        Err(e) => promotion_err(&req.id, "Gagal memuat pratinjau kenaikan kelas", e),
    }
}

fn handle_promotion_perform(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let academic_year = match resolve_academic_year(conn, req, true) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing academicYear", None),
        Err(resp) => return resp,
    };
    let Some(raw) = req.params.get("decisions") else {
        return err(&req.id, "bad_params", "missing decisions", None);
    };
    let decisions: Vec<Decision> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid decisions: {}", e),
                None,
            )
        }
    };

    let results = promotion::perform_class_promotion(conn, &academic_year, &decisions);
    ok(
        &req.id,
        json!({
            "academicYear": academic_year,
            "results": results,
            "revalidate": revalidate(&PROMOTION_VIEWS)
        }),
    )
}

fn handle_promotion_promote_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let academic_year = match resolve_academic_year(conn, req, true) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing academicYear", None),
        Err(resp) => return resp,
    };
    let exclude = match string_list(&req.params, "excludeStudentIds") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match promotion::promote_entire_class(conn, &class_id, &academic_year, &exclude) {
        Ok(results) => ok(
            &req.id,
            json!({
                "academicYear": academic_year,
                "results": results,
                "revalidate": revalidate(&PROMOTION_VIEWS)
            }),
        ),
        Err(e) => promotion_err(&req.id, "Gagal memproses kenaikan kelas", e),
    }
}

fn handle_promotion_unprocessed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let academic_year = match resolve_academic_year(conn, req, true) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing academicYear", None),
        Err(resp) => return resp,
    };
    let institution_id = optional_str(&req.params, "institutionId");
    match promotion::unprocessed_students(conn, &academic_year, institution_id) {
        Ok(students) => ok(
            &req.id,
            json!({ "academicYear": academic_year, "students": students }),
        ),
        Err(e) => promotion_err(&req.id, "Gagal memuat santri yang belum diproses", e),
    }
}

fn handle_promotion_undo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let history_id = match required_str(&req.params, "historyId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    match promotion::undo_promotion(conn, &history_id) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "undone": summary,
                "revalidate": revalidate(&PROMOTION_VIEWS)
            }),
        ),
        Err(e) => promotion_err(&req.id, "Gagal membatalkan kenaikan kelas", e),
    }
}

fn handle_promotion_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "entries": [] }));
    };
    // Unlike the other reads, no academic year means "all years" here.
    let academic_year = if optional_str(&req.params, "academicYear").is_some() {
        match resolve_academic_year(conn, req, false) {
            Ok(v) => v,
            Err(resp) => return resp,
        }
    } else {
        None
    };
    let filter = HistoryFilter {
        academic_year: academic_year.as_deref(),
        student_id: optional_str(&req.params, "studentId"),
        institution_id: optional_str(&req.params, "institutionId"),
    };
    match promotion::list_history(conn, &filter) {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => promotion_err(&req.id, "Gagal memuat riwayat kenaikan kelas", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotion.classes" => Some(handle_promotion_classes(state, req)),
        "promotion.preview" => Some(handle_promotion_preview(state, req)),
        "promotion.perform" => Some(handle_promotion_perform(state, req)),
        "promotion.promoteClass" => Some(handle_promotion_promote_class(state, req)),
        "promotion.unprocessed" => Some(handle_promotion_unprocessed(state, req)),
        "promotion.undo" => Some(handle_promotion_undo(state, req)),
        "promotion.history" => Some(handle_promotion_history(state, req)),
        _ => None,
    }
}
