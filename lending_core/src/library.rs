//! Inventory coordinator.
//!
//! `Library` owns the catalog, the ledger, and the snapshot store. It is the
//! only place where books and loans change together. Every mutation runs
//! under the write half of one `RwLock`:
//!
//! 1. copy the current state
//! 2. validate and apply the change to the copy
//! 3. snapshot the copy through the store
//! 4. install the copy
//!
//! If any step fails the copy is dropped, so memory and disk never diverge.
//! Listings take the read half and never see a half-applied borrow or return.

use crate::types::{optional_text, required_text};
use crate::{
    Book, BookId, BookUpdate, BorrowRequest, Error, LoanId, LoanStatus, LoanView, NewBook,
    Result, SnapshotStore, StoreState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

/// Liveness report with a few counters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Health {
    pub status: String,
    pub time: DateTime<Utc>,
    pub books: usize,
    pub active_loans: usize,
}

/// Single-writer coordinator over the catalog and loan ledger
pub struct Library<S: SnapshotStore> {
    state: RwLock<StoreState>,
    store: S,
}

impl<S: SnapshotStore> Library<S> {
    /// Load the durable state and take ownership of the store
    ///
    /// Fails if the snapshot is unreadable or corrupt.
    pub fn open(store: S) -> Result<Self> {
        let state = store.load()?;
        tracing::info!(
            "Library opened with {} books and {} loans",
            state.catalog().len(),
            state.ledger().len()
        );
        Ok(Self {
            state: RwLock::new(state),
            store,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        // Mutations never touch the installed state before they succeed,
        // so a poisoned lock still guards a consistent value.
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_book(&self, id: BookId) -> Result<Book> {
        self.read().catalog().get(id).cloned()
    }

    pub fn list_books(&self, filter: Option<&str>) -> Vec<Book> {
        self.read().catalog().list(filter)
    }

    pub fn get_loan(&self, id: LoanId) -> Result<LoanView> {
        let state = self.read();
        let loan = state.ledger().get(id)?.clone();
        let book = state.catalog().get(loan.book_id).map_err(|_| {
            Error::NotFound(format!("book {} missing for loan {}", loan.book_id, id))
        })?;
        Ok(LoanView::new(loan, book))
    }

    /// Loans joined with their book, newest first
    ///
    /// Loans whose book no longer exists are left out.
    pub fn list_loans(&self, status: Option<LoanStatus>) -> Vec<LoanView> {
        let state = self.read();
        state
            .ledger()
            .list(status)
            .into_iter()
            .filter_map(|loan| {
                let book = state.catalog().find(loan.book_id)?;
                Some(LoanView::new(loan, book))
            })
            .collect()
    }

    pub fn health(&self) -> Health {
        let state = self.read();
        Health {
            status: "ok".into(),
            time: Utc::now(),
            books: state.catalog().len(),
            active_loans: state.ledger().active_count(),
        }
    }

    /// Consistency problems in the current state; empty when I1 and I2 hold
    pub fn consistency_report(&self) -> Vec<String> {
        self.read().consistency_report()
    }

    /// Copy of the full state
    pub fn state(&self) -> StoreState {
        self.read().clone()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    fn mutate<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut StoreState, DateTime<Utc>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let mut next = guard.clone();
        let out = f(&mut next, Utc::now())?;

        if let Err(e) = self.store.snapshot(&next) {
            tracing::error!("Snapshot failed during {}, rolling back: {}", op, e);
            return Err(e);
        }

        *guard = next;
        Ok(out)
    }

    pub fn create_book(&self, new: NewBook) -> Result<Book> {
        let book = self.mutate("create_book", |state, now| state.catalog.create(new, now))?;
        tracing::info!("Created book {} '{}'", book.id, book.title);
        Ok(book)
    }

    pub fn update_book(&self, id: BookId, update: BookUpdate) -> Result<Book> {
        let book = self.mutate("update_book", |state, _| state.catalog.update(id, update))?;
        tracing::info!(
            "Updated book {} ({} of {} copies available)",
            book.id,
            book.copies_available,
            book.copies_total
        );
        Ok(book)
    }

    /// Delete a book and its returned loans
    ///
    /// Rejected while any loan of the book is still `borrowed`.
    pub fn delete_book(&self, id: BookId) -> Result<()> {
        let removed = self.mutate("delete_book", |state, _| {
            state.catalog.get(id)?;
            let active = state.ledger.active_count_for(id);
            if active > 0 {
                return Err(Error::Conflict(format!(
                    "cannot delete book {} with {} active loans",
                    id, active
                )));
            }
            state.catalog.remove(id)?;
            Ok(state.ledger.remove_for_book(id).len())
        })?;
        tracing::info!("Deleted book {} and {} returned loans", id, removed);
        Ok(())
    }

    /// Lend one copy of a book
    pub fn borrow(&self, request: BorrowRequest) -> Result<LoanView> {
        if request.book_id <= 0 {
            return Err(Error::InvalidArgument("book_id is required".into()));
        }
        let borrower_name = required_text("borrower_name", &request.borrower_name)?;
        let borrower_email = optional_text(request.borrower_email.as_deref());

        let view = self.mutate("borrow", |state, now| {
            let book = state.catalog.reserve_copy(request.book_id)?;
            let loan = state.ledger.open(
                book.id,
                borrower_name,
                borrower_email,
                request.due_date,
                now,
            )?;
            Ok(LoanView::new(loan, &book))
        })?;

        tracing::info!(
            "Loan {} opened: book {} to '{}'",
            view.loan.id,
            view.loan.book_id,
            view.loan.borrower_name
        );
        Ok(view)
    }

    /// Return a borrowed copy
    pub fn return_loan(&self, loan_id: LoanId) -> Result<LoanView> {
        let view = self.mutate("return_loan", |state, now| {
            let loan = state.ledger.get(loan_id)?;
            if loan.status != LoanStatus::Borrowed {
                return Err(Error::Conflict(format!("loan {} already returned", loan_id)));
            }
            let book_id = loan.book_id;
            if state.catalog.find(book_id).is_none() {
                tracing::error!("Loan {} references missing book {}", loan_id, book_id);
                return Err(Error::NotFound(format!(
                    "book {} missing for this loan",
                    book_id
                )));
            }

            let loan = state.ledger.close(loan_id, now)?;
            let book = state.catalog.release_copy(book_id)?;
            Ok(LoanView::new(loan, &book))
        })?;

        tracing::info!("Loan {} returned for book {}", loan_id, view.loan.book_id);
        Ok(view)
    }
}
