use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::payment::BookRecord;
use crate::report;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

/// Shared row mapping for the canonical book column order:
/// id, book_name, price, input_date, checking, payment_date.
pub fn book_record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookRecord> {
    let id: String = row.get(0)?;
    let book_name: String = row.get(1)?;
    let price: Option<i64> = row.get(2)?;
    let input_date: Option<String> = row.get(3)?;
    let checking: Option<i64> = row.get(4)?;
    let payment_date: Option<String> = row.get(5)?;
    Ok(BookRecord {
        id,
        book_name,
        price,
        input_date,
        checking: checking.map(|v| v != 0),
        payment_date,
    })
}

fn fetch_book(conn: &Connection, book_id: &str) -> rusqlite::Result<Option<BookRecord>> {
    conn.query_row(
        "SELECT id, book_name, price, input_date, checking, payment_date
         FROM books
         WHERE id = ?",
        [book_id],
        book_record_from_row,
    )
    .optional()
}

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn handle_books_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let book_name = match required_str(req, "bookName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if book_name.is_empty() {
        return err(&req.id, "bad_params", "bookName must not be empty", None);
    }

    // Price arrives as a number, or as a digit string from form inputs.
    let price = match req.params.get("price") {
        Some(v) if v.is_i64() || v.is_u64() => v.as_i64(),
        Some(v) => v.as_str().and_then(|s| s.trim().parse::<i64>().ok()),
        None => None,
    };
    let price = match price {
        Some(p) if p >= 0 => p,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "price must be a non-negative integer",
                None,
            )
        }
    };

    let input_date = match req.params.get("inputDate").and_then(|v| v.as_str()) {
        Some(s) => {
            let s = s.trim();
            if parse_iso_date(s).is_none() {
                return err(
                    &req.id,
                    "bad_params",
                    "inputDate must be an ISO date (YYYY-MM-DD)",
                    Some(json!({ "inputDate": s })),
                );
            }
            s.to_string()
        }
        None => chrono::Local::now().date_naive().format("%Y-%m-%d").to_string(),
    };

    let student_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM students WHERE student_code = ?",
            [&student_code],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student_id) = student_id else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let book_id = Uuid::new_v4().to_string();
    // New books start unpaid: flag cleared, no payment date.
    if let Err(e) = conn.execute(
        "INSERT INTO books(id, student_id, book_name, price, input_date, checking, payment_date)
         VALUES(?, ?, ?, ?, ?, 0, NULL)",
        (&book_id, &student_id, &book_name, price, &input_date),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "books" })),
        );
    }

    let book = BookRecord {
        id: book_id,
        book_name,
        price: Some(price),
        input_date: Some(input_date),
        checking: Some(false),
        payment_date: None,
    };
    ok(&req.id, json!({ "book": book }))
}

fn handle_books_mark_paid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let book_id = match required_str(req, "bookId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let payment_date = match required_str(req, "paymentDate") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if parse_iso_date(&payment_date).is_none() {
        return err(
            &req.id,
            "bad_params",
            "paymentDate must be an ISO date (YYYY-MM-DD)",
            Some(json!({ "paymentDate": payment_date })),
        );
    }

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM books WHERE id = ?", [&book_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "book not found", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE books SET payment_date = ?, checking = 1 WHERE id = ?",
        (&payment_date, &book_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "books" })),
        );
    }

    match fetch_book(conn, &book_id) {
        Ok(Some(book)) => ok(&req.id, json!({ "book": book })),
        Ok(None) => err(&req.id, "not_found", "book not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_books_update_payment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let book_id = match required_str(req, "bookId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Legacy-compatible write: both columns take exactly what the request
    // carries, absent fields become NULL. This is the path that lets the
    // flag and date drift apart, which the classifier must tolerate.
    let payment_date = match req.params.get("paymentDate") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "paymentDate must be a string or null",
                    None,
                )
            }
        },
    };
    let checking = match req.params.get("checking") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_bool() {
            Some(b) => Some(b),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "checking must be a boolean or null",
                    None,
                )
            }
        },
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM books WHERE id = ?", [&book_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "book not found", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE books SET payment_date = ?, checking = ? WHERE id = ?",
        (
            payment_date.as_deref(),
            checking.map(|b| if b { 1_i64 } else { 0 }),
            &book_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "books" })),
        );
    }

    match fetch_book(conn, &book_id) {
        Ok(Some(book)) => ok(&req.id, json!({ "book": book })),
        Ok(None) => err(&req.id, "not_found", "book not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_books_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let book_id = match required_str(req, "bookId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM books WHERE id = ?", [&book_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "book not found", None);
    }

    if let Err(e) = conn.execute("DELETE FROM books WHERE id = ?", [&book_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "books" })),
        );
    }

    ok(&req.id, json!({ "deleted": true }))
}

fn handle_books_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let query = match required_str(req, "query") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(10) as usize;

    if query.chars().count() < 2 {
        return ok(&req.id, json!({ "books": [] }));
    }

    // Newest first so the dedup pass keeps each name's most recent price;
    // rowid breaks same-day ties by insertion order.
    let pattern = format!("%{}%", query);
    let mut stmt = match conn.prepare(
        "SELECT id, book_name, price, input_date, checking, payment_date
         FROM books
         WHERE book_name LIKE ?
         ORDER BY input_date DESC, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&pattern], book_record_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let suggestions = report::dedup_most_recent_by_name(&rows, limit);
    ok(&req.id, json!({ "books": suggestions }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "books.create" => Some(handle_books_create(state, req)),
        "books.markPaid" => Some(handle_books_mark_paid(state, req)),
        "books.updatePayment" => Some(handle_books_update_payment(state, req)),
        "books.delete" => Some(handle_books_delete(state, req)),
        "books.search" => Some(handle_books_search(state, req)),
        _ => None,
    }
}
