use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("bookstore.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            student_code TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS books(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            book_name TEXT NOT NULL,
            price INTEGER NOT NULL,
            input_date TEXT NOT NULL,
            checking INTEGER,
            payment_date TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_books_student ON books(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_books_name ON books(book_name)",
        [],
    )?;

    // Workspaces created before payment tracking landed have a books table
    // without the payment columns. Add them if needed.
    ensure_books_payment_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_books_input_date ON books(input_date)",
        [],
    )?;

    Ok(conn)
}

fn ensure_books_payment_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "books", "checking")? {
        conn.execute("ALTER TABLE books ADD COLUMN checking INTEGER", [])?;
    }
    if !table_has_column(conn, "books", "payment_date")? {
        conn.execute("ALTER TABLE books ADD COLUMN payment_date TEXT", [])?;
    }
    Ok(())
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
