use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report;
use rusqlite::Connection;
use serde_json::json;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_unpaid_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Materialize the whole fleet once, then aggregate in memory.
    let mut stmt = match conn.prepare(
        "SELECT student_id, id, book_name, price, input_date, checking, payment_date
         FROM books",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let student_id: String = row.get(0)?;
            let id: String = row.get(1)?;
            let book_name: String = row.get(2)?;
            let price: Option<i64> = row.get(3)?;
            let input_date: Option<String> = row.get(4)?;
            let checking: Option<i64> = row.get(5)?;
            let payment_date: Option<String> = row.get(6)?;
            Ok(report::OwnedBook {
                student_id,
                book: crate::payment::BookRecord {
                    id,
                    book_name,
                    price,
                    input_date,
                    checking: checking.map(|v| v != 0),
                    payment_date,
                },
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let snapshot = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let summary = report::unpaid_summary(&snapshot);
    ok(&req.id, json!(summary))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.unpaidSummary" => Some(handle_unpaid_summary(state, req)),
        _ => None,
    }
}
