use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::parser::fields::{CandidateStudent, Position};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS students (
            id                           INTEGER PRIMARY KEY,
            university_reg_no            TEXT UNIQUE NOT NULL,
            name                         TEXT NOT NULL,
            father_name                  TEXT NOT NULL,
            dob                          TEXT NOT NULL,
            branch_year                  TEXT NOT NULL,
            matric_year                  TEXT NOT NULL,
            plus_two_year                TEXT NOT NULL,
            first_admission_year         TEXT NOT NULL,
            last_exam                    TEXT NOT NULL,
            last_exam_year               TEXT NOT NULL,
            inter_college_graduate_years TEXT NOT NULL,
            inter_college_pg_years       TEXT NOT NULL,
            inter_varsity_years          TEXT NOT NULL,
            address_with_phone           TEXT NOT NULL,
            signature_url                TEXT NOT NULL,
            passport_photo_url           TEXT NOT NULL,
            images_missing               BOOLEAN NOT NULL DEFAULT 0,
            created_at                   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS student_events (
            id                INTEGER PRIMARY KEY,
            university_reg_no TEXT NOT NULL REFERENCES students(university_reg_no),
            activity          TEXT NOT NULL,
            position          TEXT NOT NULL
                CHECK(position IN ('1st','2nd','3rd','Participated','Pending')),
            added_at          TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(university_reg_no, activity)
        );
        CREATE INDEX IF NOT EXISTS idx_events_activity ON student_events(activity);
        ",
    )?;
    Ok(())
}

// ── Saving ──

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveStats {
    pub students_added: usize,
    pub events_added: usize,
    /// Candidates whose student already had an event for the same activity.
    pub duplicate_events: usize,
}

/// Persist reviewed candidates in one transaction. Existing students are
/// never overwritten; they only gain events for activities they lack.
pub fn save_candidates(conn: &Connection, candidates: &[CandidateStudent]) -> Result<SaveStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = SaveStats::default();
    {
        let mut s_stmt = tx.prepare(
            "INSERT OR IGNORE INTO students
             (university_reg_no, name, father_name, dob, branch_year, matric_year,
              plus_two_year, first_admission_year, last_exam, last_exam_year,
              inter_college_graduate_years, inter_college_pg_years, inter_varsity_years,
              address_with_phone, signature_url, passport_photo_url, images_missing)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
        )?;
        let mut e_stmt = tx.prepare(
            "INSERT OR IGNORE INTO student_events (university_reg_no, activity, position)
             VALUES (?1, ?2, ?3)",
        )?;
        for c in candidates {
            stats.students_added += s_stmt.execute(rusqlite::params![
                c.university_reg_no, c.name, c.father_name, c.dob, c.branch_year,
                c.matric_year, c.plus_two_year, c.first_admission_year, c.last_exam,
                c.last_exam_year, c.inter_college_graduate_years, c.inter_college_pg_years,
                c.inter_varsity_years, c.address_with_phone, c.signature_url,
                c.passport_photo_url, c.images_missing,
            ])?;
            let added = e_stmt.execute(rusqlite::params![
                c.university_reg_no,
                c.activity,
                c.position.as_str(),
            ])?;
            stats.events_added += added;
            if added == 0 {
                stats.duplicate_events += 1;
            }
        }
    }
    tx.commit()?;
    Ok(stats)
}

// ── Lookups ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub activity: String,
    pub position: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub university_reg_no: String,
    pub name: String,
    pub father_name: String,
    pub dob: String,
    pub branch_year: String,
    pub matric_year: String,
    pub plus_two_year: String,
    pub first_admission_year: String,
    pub last_exam: String,
    pub last_exam_year: String,
    pub inter_college_graduate_years: String,
    pub inter_college_pg_years: String,
    pub inter_varsity_years: String,
    pub address_with_phone: String,
    pub signature_url: String,
    pub passport_photo_url: String,
    pub images_missing: bool,
    pub events: Vec<EventRecord>,
}

pub fn fetch_student(conn: &Connection, reg_no: &str) -> Result<Option<StudentRecord>> {
    let student = conn
        .query_row(
            "SELECT university_reg_no, name, father_name, dob, branch_year, matric_year,
                    plus_two_year, first_admission_year, last_exam, last_exam_year,
                    inter_college_graduate_years, inter_college_pg_years, inter_varsity_years,
                    address_with_phone, signature_url, passport_photo_url, images_missing
             FROM students WHERE university_reg_no = ?1",
            [reg_no],
            |row| {
                Ok(StudentRecord {
                    university_reg_no: row.get(0)?,
                    name: row.get(1)?,
                    father_name: row.get(2)?,
                    dob: row.get(3)?,
                    branch_year: row.get(4)?,
                    matric_year: row.get(5)?,
                    plus_two_year: row.get(6)?,
                    first_admission_year: row.get(7)?,
                    last_exam: row.get(8)?,
                    last_exam_year: row.get(9)?,
                    inter_college_graduate_years: row.get(10)?,
                    inter_college_pg_years: row.get(11)?,
                    inter_varsity_years: row.get(12)?,
                    address_with_phone: row.get(13)?,
                    signature_url: row.get(14)?,
                    passport_photo_url: row.get(15)?,
                    images_missing: row.get(16)?,
                    events: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut student) = student else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT activity, position FROM student_events
         WHERE university_reg_no = ?1 ORDER BY id",
    )?;
    student.events = stmt
        .query_map([reg_no], |row| {
            Ok(EventRecord {
                activity: row.get(0)?,
                position: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(student))
}

// ── Stats ──

#[derive(Debug, Default)]
pub struct Stats {
    pub students: i64,
    pub events: i64,
    pub flagged: i64,
    pub by_position: Vec<(Position, i64)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let mut stats = Stats {
        students: conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?,
        events: conn.query_row("SELECT COUNT(*) FROM student_events", [], |r| r.get(0))?,
        flagged: conn.query_row(
            "SELECT COUNT(*) FROM students WHERE images_missing = 1",
            [],
            |r| r.get(0),
        )?,
        by_position: Vec::new(),
    };
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM student_events WHERE position = ?1")?;
    for position in Position::ALL {
        let n: i64 = stmt.query_row([position.as_str()], |r| r.get(0))?;
        stats.by_position.push((position, n));
    }
    Ok(stats)
}
