//! Core domain types for the lending system.
//!
//! This module defines:
//! - Catalog records (books) and ledger records (loans)
//! - The loan status state machine
//! - Request shapes accepted by the `Library` coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Integer identity of a book, assigned at creation and never reused
pub type BookId = i64;

/// Integer identity of a loan, assigned at creation and never reused
pub type LoanId = i64;

// ============================================================================
// Catalog Types
// ============================================================================

/// A title in the inventory, aggregating all of its physical copies
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub category: Option<String>,
    pub copies_total: i64,
    pub copies_available: i64,
    pub created_at: DateTime<Utc>,
}

impl Book {
    /// Copies currently out on loan according to the counters
    pub fn copies_on_loan(&self) -> i64 {
        self.copies_total - self.copies_available
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.author.to_lowercase().contains(needle)
            || self
                .category
                .as_deref()
                .map(|c| c.to_lowercase().contains(needle))
                .unwrap_or(false)
    }

    /// Case-insensitive substring match against title, author, or category
    pub fn matches_filter(&self, filter: &str) -> bool {
        self.matches(&filter.to_lowercase())
    }
}

/// Fields for a new catalog entry
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub copies_total: Option<i64>,
}

/// Partial update of a catalog entry; `None` leaves the field untouched
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BookUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// An empty string clears the category
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub copies_total: Option<i64>,
}

impl BookUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.category.is_none()
            && self.copies_total.is_none()
    }
}

// ============================================================================
// Ledger Types
// ============================================================================

/// Loan state machine: `Borrowed -> Returned`, and `Returned` is terminal
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    #[default]
    Borrowed,
    Returned,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Borrowed => "borrowed",
            LoanStatus::Returned => "returned",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "borrowed" => Ok(LoanStatus::Borrowed),
            "returned" => Ok(LoanStatus::Returned),
            other => Err(Error::InvalidArgument(format!(
                "unknown loan status '{}' (expected borrowed or returned)",
                other
            ))),
        }
    }
}

/// One copy of a book lent to a borrower
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Loan {
    pub id: LoanId,
    pub book_id: BookId,
    pub borrower_name: String,
    #[serde(default)]
    pub borrower_email: Option<String>,
    #[serde(default)]
    pub status: LoanStatus,
    pub loaned_at: DateTime<Utc>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Borrowed
    }
}

/// A loan enriched with the title and author of the book it references
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoanView {
    #[serde(flatten)]
    pub loan: Loan,
    pub book_title: String,
    pub book_author: String,
}

impl LoanView {
    pub fn new(loan: Loan, book: &Book) -> Self {
        Self {
            loan,
            book_title: book.title.clone(),
            book_author: book.author.clone(),
        }
    }
}

/// Request to lend one copy of a book
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BorrowRequest {
    pub book_id: BookId,
    pub borrower_name: String,
    #[serde(default)]
    pub borrower_email: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

// ============================================================================
// Input normalisation
// ============================================================================

/// Id that follows `id` in a loaded snapshot
pub(crate) fn id_after(kind: &str, id: i64) -> Result<i64> {
    id.checked_add(1)
        .ok_or_else(|| Error::Corrupt(format!("{} id {} leaves no room for new ids", kind, id)))
}

/// Trim a required text field, rejecting it when nothing is left
pub(crate) fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional text field; blank text becomes `None`
pub(crate) fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
