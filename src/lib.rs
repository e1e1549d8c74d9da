//! Core library for the Libra library-management backend.
//!
//! The crate is organised leaf-first: Diesel [`schema`] and [`models`] back
//! the catalog, identity and possession stores in [`db`]; the borrow state
//! machine lives in [`workflow`]; [`cache`] memoizes the expensive read
//! endpoints and owns the invalidation table; [`library`] ties those together
//! behind commit-then-invalidate operations that the HTTP surface in [`api`]
//! exposes. Background reminders and reports run from [`jobs`].

pub mod api;
pub mod auth;
pub mod cache;
pub mod credentials;
pub mod db;
pub mod error;
pub mod jobs;
pub mod library;
pub mod mail;
pub mod models;
pub mod rating;
pub mod reminders;
pub mod reports;
pub mod schema;
pub mod server;
pub mod validation;
pub mod workflow;
