/// Router Module Index
///
/// Routes are split by who may reach them. Authentication is enforced per
/// module through a router layer; finer checks live in the handlers.

/// Open to anonymous callers: health, the moderation proxy and session endpoints.
pub mod public;

/// Wrapped in the session middleware. Requires a resolved [`crate::session::Session`].
pub mod authenticated;

/// Nested under `/admin`. Every handler checks the admin role itself.
pub mod admin;
