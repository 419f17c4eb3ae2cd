//! # Notes Database Crate
//!
//! This crate acts as a high-level, application-specific interface to the
//! PostgreSQL database that stores notes.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** This crate encapsulates all database-specific logic. It
//!   provides a clean, abstract API to the rest of the application, hiding
//!   the underlying SQL and database implementation details.
//! - **Readiness before traffic:** the `readiness` module owns the startup
//!   protocol that waits (with a bounded retry budget) for the database to
//!   be reachable and schema-migrated before the HTTP layer starts.
//! - **Asynchronous & Pooled:** All operations are asynchronous, and it uses a
//!   connection pool (`PgPool`) for high-performance, concurrent database access.
//!
//! ## Public API
//!
//! - `connect`: The async function to establish the database connection pool.
//! - `run_migrations`: A utility to apply database migrations, ensuring the schema is up-to-date.
//! - `ReadinessProber`: the bounded retry loop run once at startup.
//! - `NoteRepository`: The main struct that holds the connection pool and provides
//!   the CRUD data access methods for notes.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod readiness;
pub mod repository;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use readiness::{ProbeError, ProbeState, ReadinessProber, RetryPolicy, TransientKind};
pub use repository::{Note, NoteRepository};
