//! Persistence layer: libSQL-backed storage for intake records.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    ContactInfo, LeadStats, LeadSummary, ProblemCategory, ProblemSelection, RecordStore,
    StoredProblem, UserIdentity, UserRecord,
};
