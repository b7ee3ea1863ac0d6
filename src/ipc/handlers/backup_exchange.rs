use crate::backup;
use crate::ipc::error::{err, failed, ok};
use crate::ipc::handlers::core::select_workspace;
use crate::ipc::helpers::{required_str, revalidate};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export_workspace_bundle(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => {
            tracing::info!(out = %out_path.display(), sha256 = %summary.db_sha256, "workspace exported");
            ok(
                &req.id,
                json!({
                    "path": out_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "dbSha256": summary.db_sha256,
                    "dbBytes": summary.db_bytes
                }),
            )
        }
        Err(e) => failed(&req.id, "backup_failed", "Gagal membuat cadangan", format!("{e:#}")),
    }
}

fn handle_backup_import_workspace_bundle(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match required_str(&req.params, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    if !in_path.is_file() {
        return err(&req.id, "not_found", "Berkas cadangan tidak ditemukan", None);
    }

    // Release the current connection before its file is replaced.
    state.db = None;
    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(s) => s,
        Err(e) => {
            let resp = failed(&req.id, "restore_failed", "Gagal memulihkan cadangan", format!("{e:#}"));
            if let Err(reopen) = select_workspace(state, &workspace) {
                tracing::error!(error = %reopen, "failed to reopen workspace after restore error");
            }
            return resp;
        }
    };
    if let Err(e) = select_workspace(state, &workspace) {
        return failed(&req.id, "db_open_failed", "Gagal membuka workspace", format!("{e:?}"));
    }

    ok(
        &req.id,
        json!({
            "bundleFormatDetected": summary.bundle_format_detected,
            "dbSha256": summary.db_sha256,
            "revalidate": revalidate(&["students", "promotion", "classes"])
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        _ => None,
    }
}
