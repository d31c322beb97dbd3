// Single-table SQLite store for student records with email uniqueness.
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use crate::core::error::{Error, ErrorKind};
use crate::core::record::{StudentFields, StudentRecord};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    age INTEGER NOT NULL,
    grade TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL
)
"#;

const SELECT_COLUMNS: &str = "SELECT id, name, age, grade, email FROM students";

/// Owns the connection; every mutation runs in one IMMEDIATE transaction so the
/// email check and the write are atomic against other writers, including other
/// processes sharing the file.
#[derive(Debug)]
pub struct StudentStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl StudentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to create database directory")
                        .with_path(parent)
                        .with_source(err)
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|err| {
            map_sqlite_error(err, "failed to open database").with_path(path)
        })?;
        let store = Self::init(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "student store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .map_err(|err| map_sqlite_error(err, "failed to open in-memory database"))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, Error> {
        conn.execute_batch(SCHEMA)
            .map_err(|err| map_sqlite_error(err, "failed to create students table"))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn create(&self, fields: &StudentFields) -> Result<i64, Error> {
        fields.validate()?;
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| map_sqlite_error(err, "failed to begin transaction"))?;

        if email_owner(&tx, &fields.email)?.is_some() {
            return Err(duplicate_email(&fields.email));
        }
        tx.execute(
            "INSERT INTO students (name, age, grade, email) VALUES (?1, ?2, ?3, ?4)",
            params![fields.name, fields.age, fields.grade, fields.email],
        )
        .map_err(|err| map_write_error(err, &fields.email, "failed to insert student"))?;
        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|err| map_sqlite_error(err, "failed to commit insert"))?;

        debug!(id, email = %fields.email, "student created");
        Ok(id)
    }

    /// Every record, newest first.
    pub fn list_all(&self) -> Result<Vec<StudentRecord>, Error> {
        let conn = self.lock();
        query_all(&conn)
    }

    pub fn get(&self, id: i64) -> Result<StudentRecord, Error> {
        let conn = self.lock();
        find_by_id(&conn, id)?.ok_or_else(|| not_found(id))
    }

    /// Replaces every field of an existing record; callers pass current values
    /// for anything they do not intend to change.
    pub fn update(&self, id: i64, fields: &StudentFields) -> Result<StudentRecord, Error> {
        fields.validate()?;
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| map_sqlite_error(err, "failed to begin transaction"))?;

        if find_by_id(&tx, id)?.is_none() {
            return Err(not_found(id));
        }
        if let Some(owner) = email_owner(&tx, &fields.email)? {
            if owner != id {
                return Err(duplicate_email(&fields.email));
            }
        }
        tx.execute(
            "UPDATE students SET name = ?1, age = ?2, grade = ?3, email = ?4 WHERE id = ?5",
            params![fields.name, fields.age, fields.grade, fields.email, id],
        )
        .map_err(|err| map_write_error(err, &fields.email, "failed to update student"))?;
        let updated = find_by_id(&tx, id)?.ok_or_else(|| not_found(id))?;
        tx.commit()
            .map_err(|err| map_sqlite_error(err, "failed to commit update"))?;

        debug!(id, "student updated");
        Ok(updated)
    }

    /// Removes the record and returns its name.
    pub fn delete(&self, id: i64) -> Result<String, Error> {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| map_sqlite_error(err, "failed to begin transaction"))?;

        let name = tx
            .query_row(
                "SELECT name FROM students WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| map_sqlite_error(err, "failed to read student"))?
            .ok_or_else(|| not_found(id))?;
        tx.execute("DELETE FROM students WHERE id = ?1", params![id])
            .map_err(|err| map_sqlite_error(err, "failed to delete student"))?;
        tx.commit()
            .map_err(|err| map_sqlite_error(err, "failed to commit delete"))?;

        debug!(id, "student deleted");
        Ok(name)
    }

    /// The term is matched as given, whitespace included; an empty term matches nothing.
    pub fn search(&self, term: &str) -> Result<Vec<StudentRecord>, Error> {
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let needle = term.to_lowercase();
        let conn = self.lock();
        let mut records = query_all(&conn)?;
        records.retain(|record| record.matches(&needle));
        Ok(records)
    }

    pub fn count(&self) -> Result<u64, Error> {
        let conn = self.lock();
        conn.query_row("SELECT COUNT(*) FROM students", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|count| count.max(0) as u64)
        .map_err(|err| map_sqlite_error(err, "failed to count students"))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panicked holder leaves no open transaction behind; the connection stays usable.
        self.conn
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRecord> {
    Ok(StudentRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        age: row.get(2)?,
        grade: row.get(3)?,
        email: row.get(4)?,
    })
}

fn query_all(conn: &Connection) -> Result<Vec<StudentRecord>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!("{SELECT_COLUMNS} ORDER BY id DESC"))
        .map_err(|err| map_sqlite_error(err, "failed to prepare listing"))?;
    let rows = stmt
        .query_map([], map_row)
        .map_err(|err| map_sqlite_error(err, "failed to list students"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|err| map_sqlite_error(err, "failed to read student row"))
}

fn find_by_id(conn: &Connection, id: i64) -> Result<Option<StudentRecord>, Error> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
        params![id],
        map_row,
    )
    .optional()
    .map_err(|err| map_sqlite_error(err, "failed to read student"))
}

fn email_owner(conn: &Connection, email: &str) -> Result<Option<i64>, Error> {
    conn.query_row(
        "SELECT id FROM students WHERE email = ?1",
        params![email],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map_err(|err| map_sqlite_error(err, "failed to check email"))
}

fn not_found(id: i64) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message("student not found")
        .with_id(id)
        .with_hint("List students to find a valid id.")
}

fn duplicate_email(email: &str) -> Error {
    Error::new(ErrorKind::DuplicateEmail)
        .with_message(format!("email already exists: {email}"))
        .with_field("email")
        .with_hint("Choose a different email address.")
}

fn map_write_error(err: rusqlite::Error, email: &str, context: &str) -> Error {
    let unique_violation = matches!(
        &err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    );
    if unique_violation {
        duplicate_email(email).with_source(err)
    } else {
        map_sqlite_error(err, context)
    }
}

fn map_sqlite_error(err: rusqlite::Error, context: &str) -> Error {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorKind::Busy,
            ErrorCode::CannotOpen | ErrorCode::PermissionDenied | ErrorCode::ReadOnly => {
                ErrorKind::Io
            }
            _ => ErrorKind::Internal,
        },
        _ => ErrorKind::Internal,
    };
    let err_out = Error::new(kind).with_message(context.to_string());
    let err_out = if kind == ErrorKind::Busy {
        err_out.with_hint("Another process is writing to the database; try again.")
    } else {
        err_out
    };
    err_out.with_source(err)
}
