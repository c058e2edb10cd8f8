//! unsend-mailer: routes outbound site mail through the Unsend API.
//!
//! Normalizes loosely-structured mail calls into an [`mail::Envelope`],
//! submits them to the provider, falls back to native delivery when the
//! configuration asks for it, and keeps an SQLite log of every attempt.
//!
//! See `DESIGN.md` for the component breakdown.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod mail;
pub mod native;
pub mod providers;
pub mod store;

pub mod dispatch;
