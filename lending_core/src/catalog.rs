//! Catalog of books and their copy counters.
//!
//! The catalog owns `copies_total` and `copies_available` for every title.
//! Availability only moves through `reserve_copy`/`release_copy` (borrow and
//! return) and through capacity changes in `update`; all three are
//! crate-private so the `Library` coordinator is the only writer.

use crate::types::{id_after, optional_text, required_text};
use crate::{Book, BookId, BookUpdate, Error, NewBook, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// All books keyed by id, plus the id counter
#[derive(Clone, Debug)]
pub struct Catalog {
    books: BTreeMap<BookId, Book>,
    next_id: BookId,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            books: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl Catalog {
    /// Rebuild a catalog from snapshot rows
    ///
    /// Non-positive or duplicate ids and rows violating
    /// `0 <= available <= total` are rejected. A stale counter is raised past
    /// the highest stored id and never below `floor`.
    pub(crate) fn from_rows(
        rows: Vec<Book>,
        next_id: Option<BookId>,
        floor: BookId,
    ) -> Result<Self> {
        let mut books = BTreeMap::new();
        for book in rows {
            if book.id <= 0 {
                return Err(Error::Corrupt(format!("book id {} is not positive", book.id)));
            }
            if book.copies_available < 0 || book.copies_available > book.copies_total {
                return Err(Error::Corrupt(format!(
                    "book {} has {} of {} copies available",
                    book.id, book.copies_available, book.copies_total
                )));
            }
            if let Some(dup) = books.insert(book.id, book) {
                return Err(Error::Corrupt(format!("duplicate book id {}", dup.id)));
            }
        }

        let mut floor = floor.max(1);
        if let Some(&last) = books.keys().next_back() {
            floor = floor.max(id_after("book", last)?);
        }
        Ok(Self {
            books,
            next_id: next_id.unwrap_or(1).max(floor),
        })
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn next_id(&self) -> BookId {
        self.next_id
    }

    pub fn iter(&self) -> impl Iterator<Item = &Book> {
        self.books.values()
    }

    pub fn find(&self, id: BookId) -> Option<&Book> {
        self.books.get(&id)
    }

    pub fn get(&self, id: BookId) -> Result<&Book> {
        self.find(id)
            .ok_or_else(|| Error::NotFound(format!("book {} not found", id)))
    }

    /// Books ordered most-recently-created first
    ///
    /// A blank filter is treated as no filter.
    pub fn list(&self, filter: Option<&str>) -> Vec<Book> {
        let needle = filter.map(str::trim).filter(|f| !f.is_empty());
        let mut books: Vec<Book> = self
            .books
            .values()
            .filter(|b| needle.map(|n| b.matches_filter(n)).unwrap_or(true))
            .cloned()
            .collect();
        books.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        books
    }

    pub(crate) fn create(&mut self, new: NewBook, now: DateTime<Utc>) -> Result<Book> {
        let title = required_text("title", &new.title)?;
        let author = required_text("author", &new.author)?;
        let copies = new.copies_total.filter(|n| *n > 0).unwrap_or(1);

        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| Error::Storage("book id space exhausted".into()))?;

        let book = Book {
            id,
            title,
            author,
            category: optional_text(new.category.as_deref()),
            copies_total: copies,
            copies_available: copies,
            created_at: now,
        };
        self.books.insert(book.id, book.clone());

        tracing::debug!("Catalogued book {} with {} copies", book.id, copies);
        Ok(book)
    }

    /// Apply a partial update
    ///
    /// A capacity change of `d` moves availability by `d`, clamped to
    /// `[0, new_total]`. Shrinking below the loaned-out count therefore
    /// leaves availability at zero rather than rejecting the update.
    pub(crate) fn update(&mut self, id: BookId, update: BookUpdate) -> Result<Book> {
        let existing = self.get(id)?;
        if update.is_empty() {
            return Err(Error::InvalidArgument("no fields to update".into()));
        }

        let title = match update.title.as_deref() {
            Some(t) => required_text("title", t)?,
            None => existing.title.clone(),
        };
        let author = match update.author.as_deref() {
            Some(a) => required_text("author", a)?,
            None => existing.author.clone(),
        };
        let category = match update.category.as_deref() {
            Some(c) => optional_text(Some(c)),
            None => existing.category.clone(),
        };

        let new_total = update.copies_total.unwrap_or(existing.copies_total);
        if new_total < 0 {
            return Err(Error::InvalidArgument(format!(
                "copies_total must not be negative, got {}",
                new_total
            )));
        }
        let delta = new_total - existing.copies_total;
        let available = (existing.copies_available + delta).clamp(0, new_total);

        if delta < 0 && existing.copies_available + delta < 0 {
            tracing::warn!(
                "Book {} capacity reduced to {} below {} copies on loan; availability clamped to 0",
                id,
                new_total,
                existing.copies_on_loan()
            );
        }

        let book = self
            .books
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("book {} not found", id)))?;
        book.title = title;
        book.author = author;
        book.category = category;
        book.copies_total = new_total;
        book.copies_available = available;

        Ok(book.clone())
    }

    pub(crate) fn remove(&mut self, id: BookId) -> Result<Book> {
        self.books
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("book {} not found", id)))
    }

    /// Take one available copy off the shelf
    pub(crate) fn reserve_copy(&mut self, id: BookId) -> Result<Book> {
        let book = self
            .books
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("book {} not found", id)))?;
        if book.copies_available <= 0 {
            return Err(Error::Conflict(format!(
                "no available copies of '{}' to loan",
                book.title
            )));
        }
        book.copies_available -= 1;
        Ok(book.clone())
    }

    /// Put one copy back, never exceeding `copies_total`
    pub(crate) fn release_copy(&mut self, id: BookId) -> Result<Book> {
        let book = self
            .books
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("book {} missing for this loan", id)))?;
        if book.copies_available < book.copies_total {
            book.copies_available += 1;
        } else {
            tracing::debug!(
                "Book {} already at full availability ({}), return not counted",
                id,
                book.copies_total
            );
        }
        Ok(book.clone())
    }
}
