use serde::{Deserialize, Serialize};

/// One textbook-issuance row, in the wire shape the legacy service used:
/// snake_case field names, `checking` as the payment flag, `payment_date`
/// as the optional paid-on date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: String,
    pub book_name: String,
    pub price: Option<i64>,
    pub input_date: Option<String>,
    pub checking: Option<bool>,
    pub payment_date: Option<String>,
}

impl BookRecord {
    pub fn payment_state(&self) -> PaymentState {
        payment_state(self.checking, self.payment_date.as_deref())
    }

    /// Missing price counts as 0 in sums; rows from older workspaces may
    /// lack the column.
    pub fn price_or_zero(&self) -> i64 {
        self.price.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentState {
    Unpaid,
    Paid,
}

/// Resolve the flag/date pair into a payment state.
///
/// Not every write path kept `checking` and `payment_date` in sync, so
/// either signal alone marks a book paid: flag set true, or a non-empty
/// payment date. Everything else (flag false or absent, date absent or
/// empty) is unpaid. Exactly one state holds for any representable pair.
pub fn payment_state(checking: Option<bool>, payment_date: Option<&str>) -> PaymentState {
    if checking == Some(true) {
        return PaymentState::Paid;
    }
    if payment_date.map(|d| !d.is_empty()).unwrap_or(false) {
        return PaymentState::Paid;
    }
    PaymentState::Unpaid
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub unpaid_books: Vec<BookRecord>,
    pub paid_books: Vec<BookRecord>,
    pub total_unpaid_amount: i64,
}

/// Partition a student's books into unpaid/paid and total the unpaid
/// prices. Input order is preserved within each partition so the UI lists
/// stay stable across refreshes.
pub fn classify_books(books: &[BookRecord]) -> Classification {
    let mut unpaid_books: Vec<BookRecord> = Vec::new();
    let mut paid_books: Vec<BookRecord> = Vec::new();
    let mut total_unpaid_amount: i64 = 0;

    for book in books {
        match book.payment_state() {
            PaymentState::Unpaid => {
                total_unpaid_amount += book.price_or_zero();
                unpaid_books.push(book.clone());
            }
            PaymentState::Paid => {
                paid_books.push(book.clone());
            }
        }
    }

    Classification {
        unpaid_books,
        paid_books,
        total_unpaid_amount,
    }
}
