use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_bookstored");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn bookstored");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Harness {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    workspace: PathBuf,
}

impl Harness {
    fn new(prefix: &str) -> Self {
        let workspace = temp_dir(prefix);
        let (child, stdin, reader) = spawn_sidecar();
        let mut h = Harness {
            child,
            stdin,
            reader,
            next_id: 0,
            workspace,
        };
        let path = h.workspace.to_string_lossy().to_string();
        h.call("workspace.select", json!({ "path": path }));
        h
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn create_student(&mut self, name: &str) -> (String, String) {
        let result = self.call("students.create", json!({ "name": name }));
        let student = result.get("student").expect("student");
        (
            student.get("id").and_then(|v| v.as_str()).unwrap().to_string(),
            student
                .get("student_code")
                .and_then(|v| v.as_str())
                .unwrap()
                .to_string(),
        )
    }

    fn create_book(&mut self, code: &str, name: &str, price: i64, input_date: &str) -> String {
        let result = self.call(
            "books.create",
            json!({
                "studentCode": code,
                "bookName": name,
                "price": price,
                "inputDate": input_date
            }),
        );
        result
            .get("book")
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str())
            .expect("book id")
            .to_string()
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(self.workspace);
    }
}

fn ids_of(books: &serde_json::Value) -> Vec<String> {
    books
        .as_array()
        .expect("book array")
        .iter()
        .map(|b| {
            b.get("id")
                .and_then(|v| v.as_str())
                .expect("book id")
                .to_string()
        })
        .collect()
}

#[test]
fn unpaid_and_paid_split_with_total() {
    let mut h = Harness::new("bookstore-split-basic");
    let (_sid, code) = h.create_student("Split Student");

    let unpaid_id = h.create_book(&code, "Algebra", 1000, "2024-01-10");
    let paid_id = h.create_book(&code, "Biology", 2000, "2024-01-11");
    // Flag set, no payment date: still counts as paid.
    h.call(
        "books.updatePayment",
        json!({ "bookId": paid_id, "checking": true }),
    );

    let info = h.call(
        "students.info",
        json!({ "studentCode": code, "name": "Split Student" }),
    );
    assert_eq!(
        info.get("studentName").and_then(|v| v.as_str()),
        Some("Split Student")
    );
    assert_eq!(ids_of(&info["unpaidBooks"]), vec![unpaid_id]);
    assert_eq!(ids_of(&info["paidBooks"]), vec![paid_id]);
    assert_eq!(
        info.get("totalUnpaidAmount").and_then(|v| v.as_i64()),
        Some(1000)
    );

    h.finish();
}

#[test]
fn every_flag_date_combination_lands_in_exactly_one_partition() {
    let mut h = Harness::new("bookstore-split-combos");
    let (_sid, code) = h.create_student("Combo Student");

    // checking in {absent, false, true} x paymentDate in {absent, "", date}.
    // updatePayment writes exactly what it is given, so an omitted field
    // becomes NULL in storage.
    let combos: [(Option<bool>, Option<&str>, bool); 9] = [
        (None, None, true),
        (None, Some(""), true),
        (None, Some("2024-01-01"), false),
        (Some(false), None, true),
        (Some(false), Some(""), true),
        (Some(false), Some("2024-01-01"), false),
        (Some(true), None, false),
        (Some(true), Some(""), false),
        (Some(true), Some("2024-01-01"), false),
    ];

    let mut expected_unpaid: Vec<String> = Vec::new();
    let mut expected_paid: Vec<String> = Vec::new();
    let mut expected_total: i64 = 0;

    for (i, (checking, payment_date, unpaid)) in combos.iter().enumerate() {
        let price = 1_i64 << i;
        let book_id = h.create_book(&code, &format!("Combo {}", i + 1), price, "2024-01-05");

        let mut params = json!({ "bookId": book_id });
        if let Some(c) = checking {
            params["checking"] = json!(c);
        }
        if let Some(d) = payment_date {
            params["paymentDate"] = json!(d);
        }
        h.call("books.updatePayment", params);

        if *unpaid {
            expected_unpaid.push(book_id);
            expected_total += price;
        } else {
            expected_paid.push(book_id);
        }
    }

    let info = h.call(
        "students.info",
        json!({ "studentCode": code, "name": "Combo Student" }),
    );

    // Every row lands in exactly one partition, in issue order.
    assert_eq!(ids_of(&info["unpaidBooks"]), expected_unpaid);
    assert_eq!(ids_of(&info["paidBooks"]), expected_paid);
    assert_eq!(
        info["unpaidBooks"].as_array().unwrap().len() + info["paidBooks"].as_array().unwrap().len(),
        combos.len()
    );
    assert_eq!(
        info.get("totalUnpaidAmount").and_then(|v| v.as_i64()),
        Some(expected_total)
    );

    h.finish();
}

#[test]
fn lookup_is_idempotent() {
    let mut h = Harness::new("bookstore-split-idempotent");
    let (_sid, code) = h.create_student("Repeat Student");
    let paid = h.create_book(&code, "History", 5000, "2024-02-01");
    h.call(
        "books.markPaid",
        json!({ "bookId": paid, "paymentDate": "2024-02-10" }),
    );
    h.create_book(&code, "Geography", 7000, "2024-02-02");

    let first = h.call(
        "students.info",
        json!({ "studentCode": code, "name": "Repeat Student" }),
    );
    let second = h.call(
        "students.info",
        json!({ "studentCode": code, "name": "Repeat Student" }),
    );
    assert_eq!(first, second);

    h.finish();
}

#[test]
fn mark_paid_sets_both_flag_and_date() {
    let mut h = Harness::new("bookstore-split-markpaid");
    let (_sid, code) = h.create_student("MarkPaid Student");
    let book_id = h.create_book(&code, "Chemistry", 9000, "2024-03-01");

    let result = h.call(
        "books.markPaid",
        json!({ "bookId": book_id, "paymentDate": "2024-03-15" }),
    );
    let book = result.get("book").expect("book");
    assert_eq!(book.get("checking").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        book.get("payment_date").and_then(|v| v.as_str()),
        Some("2024-03-15")
    );

    let info = h.call(
        "students.info",
        json!({ "studentCode": code, "name": "MarkPaid Student" }),
    );
    assert!(info["unpaidBooks"].as_array().unwrap().is_empty());
    assert_eq!(info["paidBooks"].as_array().unwrap().len(), 1);
    assert_eq!(info.get("totalUnpaidAmount").and_then(|v| v.as_i64()), Some(0));

    h.finish();
}
