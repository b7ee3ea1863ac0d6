use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "santri.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS institutions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            next_class_id TEXT,
            FOREIGN KEY(institution_id) REFERENCES institutions(id),
            FOREIGN KEY(next_class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_institution ON classes(institution_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_next ON classes(next_class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            nis TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            class_id TEXT,
            class_since TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    // Workspaces created before class tenure tracking lack class_since.
    ensure_students_class_since(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_status ON students(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_history(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            status TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    // One processed record per student per academic year.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_class_history_student_year
         ON class_history(student_id, academic_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_history_year ON class_history(academic_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_history_class ON class_history(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_students_class_since(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "class_since")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN class_since TEXT", [])?;
    // Best-effort backfill: enrollment time is the closest thing we have.
    conn.execute(
        "UPDATE students SET class_since = created_at WHERE class_id IS NOT NULL",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, &text),
    )?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_students_table_gets_class_since_backfilled() {
        let conn = Connection::open_in_memory().expect("open memory db");
        conn.execute(
            "CREATE TABLE students(
                id TEXT PRIMARY KEY,
                nis TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                class_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT
            )",
            [],
        )
        .expect("create legacy students");
        conn.execute(
            "INSERT INTO students(id, nis, name, status, class_id, created_at)
             VALUES('s1', '001', 'Ahmad', 'ACTIVE', 'k1', '2023-07-01T00:00:00.000Z')",
            [],
        )
        .expect("insert legacy student");

        init_schema(&conn).expect("init schema");

        let since: Option<String> = conn
            .query_row("SELECT class_since FROM students WHERE id = 's1'", [], |r| {
                r.get(0)
            })
            .expect("select class_since");
        assert_eq!(since.as_deref(), Some("2023-07-01T00:00:00.000Z"));
    }

    #[test]
    fn settings_round_trip_and_overwrite() {
        let conn = Connection::open_in_memory().expect("open memory db");
        init_schema(&conn).expect("init schema");
        assert!(settings_get_json(&conn, "setup.school").unwrap().is_none());

        settings_set_json(&conn, "setup.school", &serde_json::json!({ "name": "A" })).unwrap();
        settings_set_json(&conn, "setup.school", &serde_json::json!({ "name": "B" })).unwrap();
        let v = settings_get_json(&conn, "setup.school").unwrap().expect("saved");
        assert_eq!(v["name"], "B");
    }
}
