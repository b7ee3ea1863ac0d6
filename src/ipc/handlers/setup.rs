use crate::academic_year;
use crate::db;
use crate::ipc::error::{err, failed, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    School,
    Promotion,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [SetupSection::School, SetupSection::Promotion];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "promotion" => Some(Self::Promotion),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::School => "school",
            Self::Promotion => "promotion",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::School => "setup.school",
            Self::Promotion => "setup.promotion",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::School => json!({
            "name": ""
        }),
        SetupSection::Promotion => json!({
            "currentAcademicYear": null,
            "strictAcademicYear": true
        }),
    }
}

#[derive(Debug, Clone)]
pub struct PromotionSettings {
    pub current_academic_year: Option<String>,
    pub strict_academic_year: bool,
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    // Strictness can change in the same patch as the label; validate against the new value.
    let strict = match (section, patch.get("strictAcademicYear")) {
        (SetupSection::Promotion, Some(v)) => parse_bool(v, "strictAcademicYear")?,
        _ => current
            .get("strictAcademicYear")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    };
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::School => match k.as_str() {
                "name" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
            SetupSection::Promotion => match k.as_str() {
                "currentAcademicYear" => {
                    if v.is_null() {
                        obj.insert(k.clone(), Value::Null);
                        continue;
                    }
                    let raw = parse_string_max(v, k, 40)?;
                    let label = academic_year::canonicalize(&raw, strict)?;
                    obj.insert(k.clone(), Value::String(label));
                }
                "strictAcademicYear" => {
                    obj.insert(k.clone(), Value::Bool(strict));
                }
                _ => return Err(format!("unknown promotion field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup UI.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn load_promotion_settings(conn: &rusqlite::Connection) -> anyhow::Result<PromotionSettings> {
    let v = load_section(conn, SetupSection::Promotion)?;
    Ok(PromotionSettings {
        current_academic_year: v
            .get("currentAcademicYear")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        strict_academic_year: v
            .get("strictAcademicYear")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    })
}

pub fn load_school_name(conn: &rusqlite::Connection) -> anyhow::Result<Option<String>> {
    let v = load_section(conn, SetupSection::School)?;
    Ok(v.get("name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string()))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return failed(&req.id, "db_query_failed", "Gagal memuat pengaturan", e),
        }
    }
    ok(&req.id, Value::Object(out))
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

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return failed(&req.id, "db_query_failed", "Gagal memuat pengaturan", e),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return failed(&req.id, "db_update_failed", "Gagal menyimpan pengaturan", e);
    }
    ok(&req.id, json!({ "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
