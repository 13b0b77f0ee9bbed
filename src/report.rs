use serde::Serialize;
use std::collections::HashSet;

use crate::payment::{BookRecord, PaymentState};

/// A book row paired with its owning student, as handed over by the
/// storage layer for fleet-wide aggregation.
#[derive(Debug, Clone)]
pub struct OwnedBook {
    pub student_id: String,
    pub book: BookRecord,
}

pub fn total_unpaid(books: &[OwnedBook]) -> i64 {
    books
        .iter()
        .filter(|b| b.book.payment_state() == PaymentState::Unpaid)
        .map(|b| b.book.price_or_zero())
        .sum()
}

pub fn unpaid_count(books: &[OwnedBook]) -> usize {
    books
        .iter()
        .filter(|b| b.book.payment_state() == PaymentState::Unpaid)
        .count()
}

/// Students owning at least one unpaid book. A student whose books are all
/// paid is not counted, no matter how many books they hold.
pub fn students_with_unpaid(books: &[OwnedBook]) -> usize {
    let mut owners: HashSet<&str> = HashSet::new();
    for b in books {
        if b.book.payment_state() == PaymentState::Unpaid {
            owners.insert(b.student_id.as_str());
        }
    }
    owners.len()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpaidSummary {
    pub total_unpaid_amount: i64,
    pub unpaid_books_count: usize,
    pub students_with_unpaid_books: usize,
}

/// The three dashboard metrics over one snapshot. The tables involved are
/// small, so three plain passes are fine.
pub fn unpaid_summary(books: &[OwnedBook]) -> UnpaidSummary {
    UnpaidSummary {
        total_unpaid_amount: total_unpaid(books),
        unpaid_books_count: unpaid_count(books),
        students_with_unpaid_books: students_with_unpaid(books),
    }
}

/// One autocomplete row: a distinct book name with its most recent price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSuggestion {
    pub book_name: String,
    pub recent_price: i64,
}

/// Reduce a search result set to one row per distinct name, keeping that
/// name's most recent price.
///
/// The caller supplies rows already ordered by issue date descending (ties
/// resolved by the caller's ordering), so the first occurrence of a name is
/// its most recent row. Output order is first-occurrence order, capped at
/// `limit`.
pub fn dedup_most_recent_by_name(rows: &[BookRecord], limit: usize) -> Vec<BookSuggestion> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Vec<BookSuggestion> = Vec::new();

    for row in rows {
        if out.len() >= limit {
            break;
        }
        if seen.insert(row.book_name.as_str()) {
            out.push(BookSuggestion {
                book_name: row.book_name.clone(),
                recent_price: row.price_or_zero(),
            });
        }
    }

    out
}
