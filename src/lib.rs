//! Lead CRM backend for advisory teams.
//!
//! The core is the lead list query in [`crm`]; [`web`] exposes it and the
//! lead actions over HTTP, [`db`] persists to PostgreSQL or libSQL.

pub mod config;
pub mod crm;
pub mod db;
pub mod error;
pub mod settings;
pub mod web;

#[cfg(all(test, feature = "libsql"))]
mod testing;
