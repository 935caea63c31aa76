//! Permission checks over a resolved [`Session`].
//!
//! The backend owns the records; these rules are recomputed per request from
//! the mirrored DTOs and never persisted.

use uuid::Uuid;

use crate::models::{Book, BookStatus};
use crate::session::Session;

pub fn is_author(session: &Session, author_id: Uuid) -> bool {
    session.user_id() == author_id
}

/// Published books are public; anything else is visible to its author and admins.
pub fn can_view_book(session: Option<&Session>, book: &Book) -> bool {
    if book.status == BookStatus::Published {
        return true;
    }
    session.is_some_and(|s| s.is_admin() || is_author(s, book.author.id))
}

/// Only the author edits, and only while the book is unpublished.
pub fn can_edit_book(session: &Session, book: &Book) -> bool {
    is_author(session, book.author.id) && book.status != BookStatus::Published
}

pub fn can_moderate(session: &Session) -> bool {
    session.is_admin()
}

pub fn can_view_moderation(session: &Session, author_id: Uuid) -> bool {
    session.is_admin() || is_author(session, author_id)
}

pub fn can_submit_moderation(session: &Session, author_id: Uuid) -> bool {
    is_author(session, author_id)
}
