//! Loan ledger and the borrow/return state machine.

use crate::types::id_after;
use crate::{BookId, Error, Loan, LoanId, LoanStatus, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// All loans keyed by id, plus the id counter
#[derive(Clone, Debug)]
pub struct Ledger {
    loans: BTreeMap<LoanId, Loan>,
    next_id: LoanId,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            loans: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl Ledger {
    /// Rebuild a ledger from snapshot rows
    pub(crate) fn from_rows(rows: Vec<Loan>, next_id: Option<LoanId>) -> Result<Self> {
        let mut loans = BTreeMap::new();
        for loan in rows {
            if loan.id <= 0 || loan.book_id <= 0 {
                return Err(Error::Corrupt(format!(
                    "loan {} has invalid ids (book {})",
                    loan.id, loan.book_id
                )));
            }
            if loan.status == LoanStatus::Returned && loan.returned_at.is_none() {
                tracing::warn!("Loan {} is returned but has no returned_at", loan.id);
            }
            if let Some(dup) = loans.insert(loan.id, loan) {
                return Err(Error::Corrupt(format!("duplicate loan id {}", dup.id)));
            }
        }

        let floor = match loans.keys().next_back() {
            Some(&last) => id_after("loan", last)?,
            None => 1,
        };
        Ok(Self {
            loans,
            next_id: next_id.unwrap_or(1).max(floor),
        })
    }

    pub fn len(&self) -> usize {
        self.loans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }

    pub fn next_id(&self) -> LoanId {
        self.next_id
    }

    pub fn iter(&self) -> impl Iterator<Item = &Loan> {
        self.loans.values()
    }

    pub fn get(&self, id: LoanId) -> Result<&Loan> {
        self.loans
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("loan {} not found", id)))
    }

    /// Number of `borrowed` loans against a book
    pub fn active_count_for(&self, book_id: BookId) -> i64 {
        self.loans
            .values()
            .filter(|l| l.book_id == book_id && l.is_active())
            .count() as i64
    }

    pub fn active_count(&self) -> usize {
        self.loans.values().filter(|l| l.is_active()).count()
    }

    /// Loans ordered by most recent `loaned_at` first
    pub fn list(&self, status: Option<LoanStatus>) -> Vec<Loan> {
        let mut loans: Vec<Loan> = self
            .loans
            .values()
            .filter(|l| status.map(|s| l.status == s).unwrap_or(true))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.loaned_at.cmp(&a.loaned_at).then_with(|| b.id.cmp(&a.id)));
        loans
    }

    /// Record a new `borrowed` loan; inputs are already validated
    pub(crate) fn open(
        &mut self,
        book_id: BookId,
        borrower_name: String,
        borrower_email: Option<String>,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| Error::Storage("loan id space exhausted".into()))?;

        let loan = Loan {
            id,
            book_id,
            borrower_name,
            borrower_email,
            status: LoanStatus::Borrowed,
            loaned_at: now,
            due_date,
            returned_at: None,
        };
        self.loans.insert(loan.id, loan.clone());
        Ok(loan)
    }

    /// Move a loan to its terminal `returned` state
    pub(crate) fn close(&mut self, id: LoanId, now: DateTime<Utc>) -> Result<Loan> {
        let loan = self
            .loans
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("loan {} not found", id)))?;
        if loan.status != LoanStatus::Borrowed {
            return Err(Error::Conflict(format!("loan {} already returned", id)));
        }
        loan.status = LoanStatus::Returned;
        loan.returned_at = Some(now);
        Ok(loan.clone())
    }

    /// Drop every loan of a book, returning what was removed
    pub(crate) fn remove_for_book(&mut self, book_id: BookId) -> Vec<Loan> {
        let ids: Vec<LoanId> = self
            .loans
            .values()
            .filter(|l| l.book_id == book_id)
            .map(|l| l.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.loans.remove(&id))
            .collect()
    }
}
