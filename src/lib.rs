//! Session and admin-role resolution for the Meta Point website.
//!
//! The website delegates authentication and role storage to Supabase. This
//! crate holds the client-side state machine that tracks the signed-in user,
//! resolves whether they may enter the admin back-office, and gates routes
//! and navigation on the result.

pub mod auth;
pub mod config;
pub mod integrations;
pub mod notify;

#[cfg(test)]
pub(crate) mod testing;
