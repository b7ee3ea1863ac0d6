use crate::db;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StudentStatus {
    Active,
    Alumni,
    Keluar,
    Pindah,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Alumni => "ALUMNI",
            Self::Keluar => "KELUAR",
            Self::Pindah => "PINDAH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "ALUMNI" => Some(Self::Alumni),
            "KELUAR" => Some(Self::Keluar),
            "PINDAH" => Some(Self::Pindah),
            _ => None,
        }
    }
}

/// Year-end outcome recorded for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    /// Advance to the target class.
    Naik,
    /// Graduate; leaves the class and becomes alumni.
    Lulus,
    /// Stay in the same class.
    Tinggal,
    Pindah,
    Keluar,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Naik => "NAIK",
            Self::Lulus => "LULUS",
            Self::Tinggal => "TINGGAL",
            Self::Pindah => "PINDAH",
            Self::Keluar => "KELUAR",
        }
    }
}

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("Kelas tidak ditemukan: {0}")]
    ClassNotFound(String),
    #[error("Santri tidak ditemukan: {0}")]
    StudentNotFound(String),
    #[error("Riwayat kenaikan kelas tidak ditemukan: {0}")]
    HistoryNotFound(String),
    #[error("Kelas tujuan wajib diisi untuk status NAIK")]
    MissingTargetClass,
    #[error("Kelas tujuan tidak ditemukan: {0}")]
    TargetClassNotFound(String),
    #[error("Kelas lanjutan tidak boleh menunjuk kelas itu sendiri")]
    SelfReference,
    #[error("Tahun ajaran tidak valid: {0}")]
    InvalidAcademicYear(String),
    #[error("Kesalahan basis data: {0}")]
    Db(#[from] rusqlite::Error),
}

impl PromotionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ClassNotFound(_)
            | Self::StudentNotFound(_)
            | Self::HistoryNotFound(_)
            | Self::TargetClassNotFound(_) => "not_found",
            Self::MissingTargetClass | Self::SelfReference | Self::InvalidAcademicYear(_) => {
                "bad_params"
            }
            Self::Db(_) => "promotion_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextClassRef {
    pub id: String,
    pub name: String,
    pub institution: InstitutionRef,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub id: String,
    pub nis: String,
    pub name: String,
    pub status: String,
}

/// A class as seen by the promotion screens: its successor and active roster.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionClass {
    pub id: String,
    pub name: String,
    pub institution: InstitutionRef,
    pub next_class: Option<NextClassRef>,
    pub students: Vec<RosterStudent>,
    /// All students referencing the class, whatever their status.
    pub total_students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub class_id: String,
    pub class_name: String,
    pub institution_name: String,
    pub current_count: usize,
    pub next_class_id: Option<String>,
    pub next_class_name: Option<String>,
    pub next_class_institution: Option<String>,
    pub students: Vec<RosterStudent>,
    pub is_terminal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub student_id: String,
    pub from_class_id: String,
    #[serde(default)]
    pub to_class_id: Option<String>,
    #[serde(alias = "outcome")]
    pub status: Outcome,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionResults {
    pub promoted: usize,
    pub graduated: usize,
    pub retained: usize,
    pub withdrawn: usize,
    pub transferred: usize,
    pub skipped: usize,
    pub skipped_student_ids: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub nis: String,
    pub name: String,
    pub status: String,
    pub class: Option<ClassRef>,
    pub institution: Option<InstitutionRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoSummary {
    pub history_id: String,
    pub student_id: String,
    pub restored_class_id: String,
    pub academic_year: String,
    pub undone_status: String,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter<'a> {
    pub academic_year: Option<&'a str>,
    pub student_id: Option<&'a str>,
    pub institution_id: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub student_nis: String,
    pub class_id: String,
    pub class_name: String,
    pub institution_name: String,
    pub academic_year: String,
    pub status: String,
    pub start_date: Option<String>,
    pub end_date: String,
}

pub fn class_exists(conn: &Connection, class_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Validate a next-class pointer for `class_id` (None while the class is being created).
pub fn check_next_class(
    conn: &Connection,
    class_id: Option<&str>,
    next_class_id: &str,
) -> Result<(), PromotionError> {
    if class_id == Some(next_class_id) {
        return Err(PromotionError::SelfReference);
    }
    if !class_exists(conn, next_class_id)? {
        return Err(PromotionError::ClassNotFound(next_class_id.to_string()));
    }
    Ok(())
}

pub fn classes_for_promotion(
    conn: &Connection,
    institution_id: Option<&str>,
) -> Result<Vec<PromotionClass>, PromotionError> {
    let mut roster_stmt = conn.prepare(
        "SELECT s.id, s.nis, s.name, s.status, s.class_id
         FROM students s
         JOIN classes c ON c.id = s.class_id
         WHERE s.status = 'ACTIVE'
           AND (?1 IS NULL OR c.institution_id = ?1)
         ORDER BY s.name, s.nis",
    )?;
    let mut rosters: HashMap<String, Vec<RosterStudent>> = HashMap::new();
    let roster_rows = roster_stmt.query_map([institution_id], |row| {
        Ok((
            row.get::<_, String>(4)?,
            RosterStudent {
                id: row.get(0)?,
                nis: row.get(1)?,
                name: row.get(2)?,
                status: row.get(3)?,
            },
        ))
    })?;
    for r in roster_rows {
        let (class_id, student) = r?;
        rosters.entry(class_id).or_default().push(student);
    }

    // Correlated subquery keeps the total independent of the joins.
    let mut stmt = conn.prepare(
        "SELECT
           c.id, c.name, i.id, i.name,
           n.id, n.name, ni.id, ni.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS total_students
         FROM classes c
         JOIN institutions i ON i.id = c.institution_id
         LEFT JOIN classes n ON n.id = c.next_class_id
         LEFT JOIN institutions ni ON ni.id = n.institution_id
         WHERE (?1 IS NULL OR c.institution_id = ?1)
         ORDER BY i.name, c.name",
    )?;
    let rows = stmt.query_map([institution_id], |row| {
        let next_id: Option<String> = row.get(4)?;
        let next_class = match next_id {
            Some(id) => Some(NextClassRef {
                id,
                name: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                institution: InstitutionRef {
                    id: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    name: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                },
            }),
            None => None,
        };
        Ok(PromotionClass {
            id: row.get(0)?,
            name: row.get(1)?,
            institution: InstitutionRef {
                id: row.get(2)?,
                name: row.get(3)?,
            },
            next_class,
            students: Vec::new(),
            total_students: row.get(8)?,
        })
    })?;

    let mut classes = rows.collect::<Result<Vec<_>, _>>()?;
    for class in classes.iter_mut() {
        class.students = rosters.remove(&class.id).unwrap_or_default();
    }
    Ok(classes)
}

pub fn build_preview(classes: Vec<PromotionClass>) -> Vec<PreviewRow> {
    classes
        .into_iter()
        .map(|c| PreviewRow {
            class_id: c.id,
            class_name: c.name,
            institution_name: c.institution.name,
            current_count: c.students.len(),
            is_terminal: c.next_class.is_none(),
            next_class_id: c.next_class.as_ref().map(|n| n.id.clone()),
            next_class_name: c.next_class.as_ref().map(|n| n.name.clone()),
            next_class_institution: c.next_class.map(|n| n.institution.name),
            students: c.students,
        })
        .collect()
}

pub fn promotion_preview(
    conn: &Connection,
    institution_id: Option<&str>,
) -> Result<Vec<PreviewRow>, PromotionError> {
    Ok(build_preview(classes_for_promotion(conn, institution_id)?))
}

enum Applied {
    Done(Outcome),
    AlreadyProcessed,
}

/// Apply one decision inside its own transaction. Dropping `tx` on an early
/// return rolls back anything written for this student.
fn apply_decision(
    conn: &Connection,
    academic_year: &str,
    decision: &Decision,
    now: &str,
) -> Result<Applied, PromotionError> {
    let tx = conn.unchecked_transaction()?;

    let class_since: Option<Option<String>> = tx
        .query_row(
            "SELECT class_since FROM students WHERE id = ?",
            [&decision.student_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(class_since) = class_since else {
        return Err(PromotionError::StudentNotFound(decision.student_id.clone()));
    };

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM class_history WHERE student_id = ? AND academic_year = ?",
            (&decision.student_id, academic_year),
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(Applied::AlreadyProcessed);
    }

    let target = match decision.status {
        Outcome::Naik => {
            let Some(target) = decision.to_class_id.as_deref() else {
                return Err(PromotionError::MissingTargetClass);
            };
            if !class_exists(&tx, target)? {
                return Err(PromotionError::TargetClassNotFound(target.to_string()));
            }
            Some(target)
        }
        _ => None,
    };

    tx.execute(
        "INSERT INTO class_history(
           id, student_id, class_id, academic_year, status, start_date, end_date, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &decision.student_id,
            &decision.from_class_id,
            academic_year,
            decision.status.as_str(),
            &class_since,
            now,
            now,
        ),
    )?;

    match decision.status {
        Outcome::Naik => {
            tx.execute(
                "UPDATE students SET class_id = ?, class_since = ?, updated_at = ? WHERE id = ?",
                (target, now, now, &decision.student_id),
            )?;
        }
        Outcome::Lulus => {
            tx.execute(
                "UPDATE students
                 SET class_id = NULL, class_since = NULL, status = 'ALUMNI', updated_at = ?
                 WHERE id = ?",
                (now, &decision.student_id),
            )?;
        }
        Outcome::Tinggal => {}
        // Class reference is intentionally left as-is for withdrawn/transferred students.
        Outcome::Keluar | Outcome::Pindah => {
            let status = if decision.status == Outcome::Keluar {
                StudentStatus::Keluar
            } else {
                StudentStatus::Pindah
            };
            tx.execute(
                "UPDATE students SET status = ?, updated_at = ? WHERE id = ?",
                (status.as_str(), now, &decision.student_id),
            )?;
        }
    }

    tx.commit()?;
    Ok(Applied::Done(decision.status))
}

/// Process decisions one by one. A failing student is reported in `errors`
/// and never stops the batch; students already processed for the year are skipped.
pub fn perform_class_promotion(
    conn: &Connection,
    academic_year: &str,
    decisions: &[Decision],
) -> PromotionResults {
    let now = db::now_rfc3339();
    let mut results = PromotionResults::default();

    for decision in decisions {
        match apply_decision(conn, academic_year, decision, &now) {
            Ok(Applied::Done(outcome)) => match outcome {
                Outcome::Naik => results.promoted += 1,
                Outcome::Lulus => results.graduated += 1,
                Outcome::Tinggal => results.retained += 1,
                Outcome::Keluar => results.withdrawn += 1,
                Outcome::Pindah => results.transferred += 1,
            },
            Ok(Applied::AlreadyProcessed) => {
                results.skipped += 1;
                results.skipped_student_ids.push(decision.student_id.clone());
            }
            Err(e) => {
                tracing::warn!(
                    student_id = %decision.student_id,
                    academic_year,
                    error = %e,
                    "promotion decision failed"
                );
                results
                    .errors
                    .push(format!("Santri {}: {}", decision.student_id, e));
            }
        }
    }

    tracing::info!(
        academic_year,
        total = decisions.len(),
        promoted = results.promoted,
        graduated = results.graduated,
        retained = results.retained,
        withdrawn = results.withdrawn,
        transferred = results.transferred,
        skipped = results.skipped,
        errors = results.errors.len(),
        "promotion batch finished"
    );
    results
}

/// Decisions for every active, non-excluded student of a class: NAIK into the
/// next class when there is one, LULUS otherwise.
pub fn entire_class_decisions(
    conn: &Connection,
    class_id: &str,
    exclude_student_ids: &[String],
) -> Result<Vec<Decision>, PromotionError> {
    let next: Option<Option<String>> = conn
        .query_row(
            "SELECT next_class_id FROM classes WHERE id = ?",
            [class_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(next_class_id) = next else {
        return Err(PromotionError::ClassNotFound(class_id.to_string()));
    };

    let excluded: HashSet<&str> = exclude_student_ids.iter().map(|s| s.as_str()).collect();
    let outcome = if next_class_id.is_some() {
        Outcome::Naik
    } else {
        Outcome::Lulus
    };

    let mut stmt = conn.prepare(
        "SELECT id FROM students
         WHERE class_id = ? AND status = 'ACTIVE'
         ORDER BY name, nis",
    )?;
    let ids = stmt
        .query_map([class_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ids
        .into_iter()
        .filter(|id| !excluded.contains(id.as_str()))
        .map(|student_id| Decision {
            student_id,
            from_class_id: class_id.to_string(),
            to_class_id: next_class_id.clone(),
            status: outcome,
        })
        .collect())
}

pub fn promote_entire_class(
    conn: &Connection,
    class_id: &str,
    academic_year: &str,
    exclude_student_ids: &[String],
) -> Result<PromotionResults, PromotionError> {
    let decisions = entire_class_decisions(conn, class_id, exclude_student_ids)?;
    Ok(perform_class_promotion(conn, academic_year, &decisions))
}

/// Active students with no history entry under `academic_year`.
pub fn unprocessed_students(
    conn: &Connection,
    academic_year: &str,
    institution_id: Option<&str>,
) -> Result<Vec<StudentRecord>, PromotionError> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.nis, s.name, s.status, c.id, c.name, i.id, i.name
         FROM students s
         LEFT JOIN classes c ON c.id = s.class_id
         LEFT JOIN institutions i ON i.id = c.institution_id
         WHERE s.status = 'ACTIVE'
           AND (?2 IS NULL OR c.institution_id = ?2)
           AND NOT EXISTS (
             SELECT 1 FROM class_history h
             WHERE h.student_id = s.id AND h.academic_year = ?1
           )
         ORDER BY i.name, c.name, s.name, s.nis",
    )?;
    let rows = stmt.query_map((academic_year, institution_id), student_record_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Expects columns: s.id, s.nis, s.name, s.status, c.id, c.name, i.id, i.name.
pub fn student_record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRecord> {
    let class_id: Option<String> = row.get(4)?;
    let class_name: Option<String> = row.get(5)?;
    let inst_id: Option<String> = row.get(6)?;
    let inst_name: Option<String> = row.get(7)?;
    Ok(StudentRecord {
        id: row.get(0)?,
        nis: row.get(1)?,
        name: row.get(2)?,
        status: row.get(3)?,
        class: class_id.map(|id| ClassRef {
            id,
            name: class_name.unwrap_or_default(),
        }),
        institution: inst_id.map(|id| InstitutionRef {
            id,
            name: inst_name.unwrap_or_default(),
        }),
    })
}

/// Revert one history entry: the student goes back to the recorded class as
/// ACTIVE and the entry is removed. Later changes to the student are overwritten.
pub fn undo_promotion(conn: &Connection, history_id: &str) -> Result<UndoSummary, PromotionError> {
    let tx = conn.unchecked_transaction()?;

    let entry: Option<(String, String, String, String, Option<String>)> = tx
        .query_row(
            "SELECT h.student_id, h.class_id, h.academic_year, h.status, h.start_date
             FROM class_history h
             JOIN students s ON s.id = h.student_id
             WHERE h.id = ?",
            [history_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let Some((student_id, class_id, academic_year, status, start_date)) = entry else {
        return Err(PromotionError::HistoryNotFound(history_id.to_string()));
    };

    tx.execute(
        "UPDATE students
         SET class_id = ?, class_since = ?, status = 'ACTIVE', updated_at = ?
         WHERE id = ?",
        (&class_id, &start_date, db::now_rfc3339(), &student_id),
    )?;
    tx.execute("DELETE FROM class_history WHERE id = ?", [history_id])?;
    tx.commit()?;

    tracing::info!(history_id, student_id = %student_id, academic_year = %academic_year, "promotion undone");
    Ok(UndoSummary {
        history_id: history_id.to_string(),
        student_id,
        restored_class_id: class_id,
        academic_year,
        undone_status: status,
    })
}

pub fn list_history(
    conn: &Connection,
    filter: &HistoryFilter<'_>,
) -> Result<Vec<HistoryEntry>, PromotionError> {
    let mut stmt = conn.prepare(
        "SELECT h.id, s.id, s.name, s.nis, c.id, c.name, i.name,
                h.academic_year, h.status, h.start_date, h.end_date
         FROM class_history h
         JOIN students s ON s.id = h.student_id
         JOIN classes c ON c.id = h.class_id
         JOIN institutions i ON i.id = c.institution_id
         WHERE (?1 IS NULL OR h.academic_year = ?1)
           AND (?2 IS NULL OR h.student_id = ?2)
           AND (?3 IS NULL OR c.institution_id = ?3)
         ORDER BY h.academic_year DESC, i.name, c.name, s.name",
    )?;
    let rows = stmt.query_map(
        (filter.academic_year, filter.student_id, filter.institution_id),
        |row| {
            Ok(HistoryEntry {
                id: row.get(0)?,
                student_id: row.get(1)?,
                student_name: row.get(2)?,
                student_nis: row.get(3)?,
                class_id: row.get(4)?,
                class_name: row.get(5)?,
                institution_name: row.get(6)?,
                academic_year: row.get(7)?,
                status: row.get(8)?,
                start_date: row.get(9)?,
                end_date: row.get(10)?,
            })
        },
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YEAR: &str = "2024/2025";

    // Institution I: A -> B (terminal). S1, S2 active in A; S3 active in B; S4 alumni left in A.
    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open memory db");
        db::init_schema(&conn).expect("init schema");
        conn.execute(
            "INSERT INTO institutions(id, name, created_at) VALUES('I', 'MTs', '2024-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO institutions(id, name, created_at) VALUES('J', 'MA', '2024-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO classes(id, name, institution_id, next_class_id) VALUES('B', 'Kelas 8', 'I', NULL)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO classes(id, name, institution_id, next_class_id) VALUES('A', 'Kelas 7', 'I', 'B')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO classes(id, name, institution_id, next_class_id) VALUES('X', 'Kelas 10', 'J', NULL)",
            [],
        )
        .unwrap();
        for (id, nis, name, status, class_id) in [
            ("S1", "001", "Ahmad", "ACTIVE", Some("A")),
            ("S2", "002", "Bilal", "ACTIVE", Some("A")),
            ("S3", "003", "Citra", "ACTIVE", Some("B")),
            ("S4", "004", "Dewi", "ALUMNI", Some("A")),
            ("S5", "005", "Fajar", "ACTIVE", Some("X")),
        ] {
            conn.execute(
                "INSERT INTO students(id, nis, name, status, class_id, class_since, created_at)
                 VALUES(?, ?, ?, ?, ?, '2023-07-15', '2023-07-15')",
                (id, nis, name, status, class_id),
            )
            .unwrap();
        }
        conn
    }

    fn student_state(conn: &Connection, id: &str) -> (Option<String>, String) {
        conn.query_row(
            "SELECT class_id, status FROM students WHERE id = ?",
            [id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("student row")
    }

    fn history_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM class_history", [], |r| r.get(0))
            .expect("count history")
    }

    fn decision(student: &str, from: &str, to: Option<&str>, status: Outcome) -> Decision {
        Decision {
            student_id: student.to_string(),
            from_class_id: from.to_string(),
            to_class_id: to.map(|s| s.to_string()),
            status,
        }
    }

    #[test]
    fn reader_orders_and_counts_roster() {
        let conn = seeded();
        let classes = classes_for_promotion(&conn, Some("I")).expect("classes");
        let names: Vec<&str> = classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Kelas 7", "Kelas 8"]);

        let a = &classes[0];
        let roster: Vec<&str> = a.students.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(roster, vec!["Ahmad", "Bilal"]);
        assert_eq!(a.total_students, 3, "alumni still counted in total");
        assert_eq!(a.next_class.as_ref().map(|n| n.name.as_str()), Some("Kelas 8"));

        let all = classes_for_promotion(&conn, None).expect("all classes");
        assert_eq!(all.len(), 3);
        // MA sorts before MTs.
        assert_eq!(all[0].institution.name, "MA");
    }

    #[test]
    fn preview_flags_terminal_classes() {
        let conn = seeded();
        let rows = promotion_preview(&conn, Some("I")).expect("preview");
        let a = rows.iter().find(|r| r.class_id == "A").expect("row A");
        assert!(!a.is_terminal);
        assert_eq!(a.next_class_id.as_deref(), Some("B"));
        assert_eq!(a.next_class_name.as_deref(), Some("Kelas 8"));
        assert_eq!(a.next_class_institution.as_deref(), Some("MTs"));
        assert_eq!(a.current_count, 2);

        let b = rows.iter().find(|r| r.class_id == "B").expect("row B");
        assert!(b.is_terminal);
        assert!(b.next_class_name.is_none());
    }

    #[test]
    fn outcomes_mutate_student_as_expected() {
        let conn = seeded();
        let res = perform_class_promotion(
            &conn,
            YEAR,
            &[
                decision("S1", "A", Some("B"), Outcome::Naik),
                decision("S3", "B", None, Outcome::Lulus),
                decision("S2", "A", None, Outcome::Keluar),
                decision("S5", "X", None, Outcome::Tinggal),
            ],
        );
        assert!(res.errors.is_empty(), "{:?}", res.errors);
        assert_eq!(res.promoted, 1);
        assert_eq!(res.graduated, 1);
        assert_eq!(res.withdrawn, 1);
        assert_eq!(res.retained, 1);

        assert_eq!(student_state(&conn, "S1"), (Some("B".to_string()), "ACTIVE".to_string()));
        assert_eq!(student_state(&conn, "S3"), (None, "ALUMNI".to_string()));
        assert_eq!(student_state(&conn, "S2"), (Some("A".to_string()), "KELUAR".to_string()));
        assert_eq!(student_state(&conn, "S5"), (Some("X".to_string()), "ACTIVE".to_string()));
        assert_eq!(history_count(&conn), 4);
    }

    #[test]
    fn missing_student_does_not_stop_batch() {
        let conn = seeded();
        let res = perform_class_promotion(
            &conn,
            YEAR,
            &[
                decision("S1", "A", Some("B"), Outcome::Naik),
                decision("NOPE", "A", Some("B"), Outcome::Naik),
                decision("S2", "A", Some("B"), Outcome::Naik),
            ],
        );
        assert_eq!(res.promoted, 2);
        assert_eq!(res.errors.len(), 1);
        assert!(res.errors[0].contains("NOPE"));
        assert_eq!(history_count(&conn), 2);
    }

    #[test]
    fn naik_without_target_rolls_back_that_student() {
        let conn = seeded();
        let res = perform_class_promotion(&conn, YEAR, &[decision("S1", "A", None, Outcome::Naik)]);
        assert_eq!(res.errors.len(), 1);
        assert_eq!(history_count(&conn), 0);
        assert_eq!(student_state(&conn, "S1"), (Some("A".to_string()), "ACTIVE".to_string()));
    }

    #[test]
    fn resubmitting_batch_is_skipped() {
        let conn = seeded();
        let batch = [
            decision("S1", "A", Some("B"), Outcome::Naik),
            decision("S2", "A", None, Outcome::Tinggal),
        ];
        let first = perform_class_promotion(&conn, YEAR, &batch);
        assert_eq!(first.promoted + first.retained, 2);

        let second = perform_class_promotion(&conn, YEAR, &batch);
        assert_eq!(second.promoted, 0);
        assert_eq!(second.retained, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.skipped_student_ids, vec!["S1", "S2"]);
        assert!(second.errors.is_empty());
        assert_eq!(history_count(&conn), 2);
    }

    #[test]
    fn unprocessed_is_active_minus_history() {
        let conn = seeded();
        let res = perform_class_promotion(&conn, YEAR, &[decision("S1", "A", None, Outcome::Tinggal)]);
        assert_eq!(res.retained, 1);

        let rest = unprocessed_students(&conn, YEAR, Some("I")).expect("unprocessed");
        let ids: Vec<&str> = rest.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S3"]);
        assert_eq!(rest[0].class.as_ref().map(|c| c.name.as_str()), Some("Kelas 7"));

        // A different label is a different processed set.
        let other = unprocessed_students(&conn, "2025/2026", Some("I")).expect("other year");
        assert_eq!(other.len(), 3);
    }

    #[test]
    fn undo_restores_class_and_status() {
        let conn = seeded();
        let res = perform_class_promotion(&conn, YEAR, &[decision("S3", "B", None, Outcome::Lulus)]);
        assert_eq!(res.graduated, 1);
        let history = list_history(
            &conn,
            &HistoryFilter {
                student_id: Some("S3"),
                ..Default::default()
            },
        )
        .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].start_date.as_deref(), Some("2023-07-15"));

        let summary = undo_promotion(&conn, &history[0].id).expect("undo");
        assert_eq!(summary.restored_class_id, "B");
        assert_eq!(summary.undone_status, "LULUS");
        assert_eq!(student_state(&conn, "S3"), (Some("B".to_string()), "ACTIVE".to_string()));
        assert_eq!(history_count(&conn), 0);
    }

    #[test]
    fn undo_unknown_entry_is_not_found() {
        let conn = seeded();
        let e = undo_promotion(&conn, "missing").unwrap_err();
        assert!(matches!(e, PromotionError::HistoryNotFound(_)));
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn entire_class_uses_next_pointer_or_graduates() {
        let conn = seeded();
        let to_next = entire_class_decisions(&conn, "A", &[]).expect("decisions A");
        assert_eq!(to_next.len(), 2);
        assert!(to_next
            .iter()
            .all(|d| d.status == Outcome::Naik && d.to_class_id.as_deref() == Some("B")));

        let excluded = entire_class_decisions(&conn, "A", &["S2".to_string()]).expect("excluded");
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].student_id, "S1");

        let terminal = entire_class_decisions(&conn, "B", &[]).expect("decisions B");
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, Outcome::Lulus);

        let res = promote_entire_class(&conn, "A", YEAR, &[]).expect("promote A");
        assert_eq!(res.promoted, 2);

        assert!(matches!(
            entire_class_decisions(&conn, "ZZ", &[]),
            Err(PromotionError::ClassNotFound(_))
        ));
    }

    #[test]
    fn next_class_pointer_validation() {
        let conn = seeded();
        assert!(check_next_class(&conn, Some("A"), "B").is_ok());
        assert!(matches!(
            check_next_class(&conn, Some("A"), "A"),
            Err(PromotionError::SelfReference)
        ));
        assert!(matches!(
            check_next_class(&conn, None, "nope"),
            Err(PromotionError::ClassNotFound(_))
        ));
    }

    #[test]
    fn decision_accepts_outcome_alias() {
        let d: Decision = serde_json::from_value(serde_json::json!({
            "studentId": "S1",
            "fromClassId": "A",
            "outcome": "LULUS"
        }))
        .expect("parse decision");
        assert_eq!(d.status, Outcome::Lulus);
        assert!(d.to_class_id.is_none());
    }
}
