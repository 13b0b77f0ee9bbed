use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::payment;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::books;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, student_code
         FROM students
         ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_code: String = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "student_code": student_code
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let query = match required_str(req, "query") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };

    // The UI fires a request per keystroke; anything shorter than two
    // characters matches too much to be useful.
    if query.chars().count() < 2 {
        return ok(&req.id, json!({ "students": [] }));
    }

    let pattern = format!("%{}%", query);
    let mut stmt = match conn.prepare(
        "SELECT id, name, student_code
         FROM students
         WHERE name LIKE ?1 OR student_code LIKE ?1
         ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&pattern], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_code: String = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "student_code": student_code
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let name_taken: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE name = ?", [&name], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if name_taken.is_some() {
        return err(
            &req.id,
            "conflict",
            "a student with this name already exists",
            Some(json!({ "name": name })),
        );
    }

    let student_code = match allocate_student_code(conn) {
        Ok(Some(code)) => code,
        Ok(None) => {
            return err(
                &req.id,
                "conflict",
                "could not allocate a unique student code",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, name, student_code) VALUES(?, ?, ?)",
        (&student_id, &name, &student_code),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({
            "student": {
                "id": student_id,
                "name": name,
                "student_code": student_code
            }
        }),
    )
}

/// Pick a random 8-digit code not yet in use. The code space is large
/// enough that a handful of retries always suffices in practice.
fn allocate_student_code(conn: &Connection) -> rusqlite::Result<Option<String>> {
    let mut rng = rand::thread_rng();
    for _ in 0..100 {
        let code: i64 = rng.gen_range(10_000_000..=99_999_999);
        let code = code.to_string();
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM students WHERE student_code = ?",
                [&code],
                |r| r.get(0),
            )
            .optional()?;
        if taken.is_none() {
            return Ok(Some(code));
        }
    }
    Ok(None)
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let deleted_books_count: i64 = match tx.query_row(
        "SELECT COUNT(*) FROM books WHERE student_id = ?",
        [&student_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };

    // Owned books go with the student, all or nothing.
    if let Err(e) = tx.execute("DELETE FROM books WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "books" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "deleted": true, "deletedBooksCount": deleted_books_count }),
    )
}

fn handle_students_info(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, name FROM students WHERE student_code = ? AND name = ?",
            (&student_code, &name),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, student_name)) = student else {
        return err(&req.id, "not_found", "student not found", None);
    };

    // Issue order keeps the unpaid/paid lists stable across refreshes.
    let mut stmt = match conn.prepare(
        "SELECT id, book_name, price, input_date, checking, payment_date
         FROM books
         WHERE student_id = ?
         ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let records = stmt
        .query_map([&student_id], books::book_record_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let records = match records {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let split = payment::classify_books(&records);
    ok(
        &req.id,
        json!({
            "studentName": student_name,
            "unpaidBooks": split.unpaid_books,
            "paidBooks": split.paid_books,
            "totalUnpaidAmount": split.total_unpaid_amount
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.search" => Some(handle_students_search(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.info" => Some(handle_students_info(state, req)),
        _ => None,
    }
}
