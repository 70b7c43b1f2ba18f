//! Whole-dataset state and its on-disk snapshot document.
//!
//! A snapshot is one JSON document holding every book and loan:
//!
//! ```json
//! {"format_version":1,"next_book_id":3,"next_loan_id":5,"books":[...],"loans":[...]}
//! ```
//!
//! Fields added to books or loans after version 1 must carry a serde
//! default so older files keep loading.

use crate::types::id_after;
use crate::{Book, BookId, Catalog, Error, Ledger, Loan, LoanId, LoanStatus, Result};
use serde::{Deserialize, Serialize};

/// Current snapshot format version
pub const FORMAT_VERSION: u32 = 1;

/// Serialized form of the full dataset
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotDocument {
    #[serde(default = "legacy_format_version")]
    pub format_version: u32,
    #[serde(default)]
    pub next_book_id: Option<BookId>,
    #[serde(default)]
    pub next_loan_id: Option<LoanId>,
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub loans: Vec<Loan>,
}

fn legacy_format_version() -> u32 {
    1
}

/// In-memory catalog and ledger, always replaced as a unit
#[derive(Clone, Debug, Default)]
pub struct StoreState {
    pub(crate) catalog: Catalog,
    pub(crate) ledger: Ledger,
}

impl StoreState {
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn to_document(&self) -> SnapshotDocument {
        SnapshotDocument {
            format_version: FORMAT_VERSION,
            next_book_id: Some(self.catalog.next_id()),
            next_loan_id: Some(self.ledger.next_id()),
            books: self.catalog.iter().cloned().collect(),
            loans: self.ledger.iter().cloned().collect(),
        }
    }

    /// Rebuild state from a snapshot, refusing anything that cannot be trusted
    pub fn from_document(doc: SnapshotDocument) -> Result<Self> {
        if doc.format_version > FORMAT_VERSION {
            return Err(Error::Corrupt(format!(
                "snapshot format version {} is newer than supported version {}",
                doc.format_version, FORMAT_VERSION
            )));
        }

        let ledger = Ledger::from_rows(doc.loans, doc.next_loan_id)?;
        // Ids of deleted books that loans still reference are never handed out again
        let book_floor = match ledger.iter().map(|l| l.book_id).max() {
            Some(id) => id_after("book", id)?,
            None => 1,
        };
        let state = Self {
            catalog: Catalog::from_rows(doc.books, doc.next_book_id, book_floor)?,
            ledger,
        };

        for problem in state.consistency_report() {
            tracing::warn!("Snapshot consistency: {}", problem);
        }
        Ok(state)
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let doc = self.to_document();
        let contents = if pretty {
            serde_json::to_string_pretty(&doc)?
        } else {
            serde_json::to_string(&doc)?
        };
        Ok(contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let doc: SnapshotDocument = serde_json::from_str(contents)
            .map_err(|e| Error::Corrupt(format!("unparsable snapshot: {}", e)))?;
        Self::from_document(doc)
    }

    /// Describe every book whose counters disagree with the ledger
    ///
    /// Copy counters out of bounds, loaned-out counts that differ from the
    /// number of `borrowed` loans, and active loans pointing at missing
    /// books are reported. An empty report means both invariants hold.
    pub fn consistency_report(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for book in self.catalog.iter() {
            if book.copies_available < 0 || book.copies_available > book.copies_total {
                problems.push(format!(
                    "book {} has {} of {} copies available",
                    book.id, book.copies_available, book.copies_total
                ));
            }
            let active = self.ledger.active_count_for(book.id);
            if book.copies_on_loan() != active {
                problems.push(format!(
                    "book {} counts {} copies on loan but has {} borrowed loans",
                    book.id,
                    book.copies_on_loan(),
                    active
                ));
            }
        }

        for loan in self.ledger.iter() {
            if loan.status == LoanStatus::Borrowed && self.catalog.find(loan.book_id).is_none() {
                problems.push(format!(
                    "loan {} is borrowed against missing book {}",
                    loan.id, loan.book_id
                ));
            }
        }

        problems
    }
}
