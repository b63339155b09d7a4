//! `RecordStore` trait: single async interface for lead persistence.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// The closed set of problem categories a user can pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemCategory {
    Anxiety,
    Relationships,
    BurnoutSelfEsteem,
    Custom,
}

impl ProblemCategory {
    /// The three categories offered as one-tap choices.
    pub const FIXED: [ProblemCategory; 3] = [
        ProblemCategory::Anxiety,
        ProblemCategory::Relationships,
        ProblemCategory::BurnoutSelfEsteem,
    ];

    /// Stable storage code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anxiety => "anxiety",
            Self::Relationships => "relationships",
            Self::BurnoutSelfEsteem => "burnout_self_esteem",
            Self::Custom => "custom",
        }
    }

    /// Human-readable label used in reports and notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Anxiety => "Anxiety / Stress",
            Self::Relationships => "Relationships",
            Self::BurnoutSelfEsteem => "Burnout / Self-esteem",
            Self::Custom => "Own problem",
        }
    }
}

impl fmt::Display for ProblemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProblemCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anxiety" => Ok(Self::Anxiety),
            "relationships" => Ok(Self::Relationships),
            "burnout_self_esteem" => Ok(Self::BurnoutSelfEsteem),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown problem category: {other}")),
        }
    }
}

/// A validated problem selection.
///
/// Custom text can only exist together with the `Custom` category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemSelection {
    Fixed(ProblemCategory),
    Custom(String),
}

impl ProblemSelection {
    pub fn category(&self) -> ProblemCategory {
        match self {
            Self::Fixed(category) => *category,
            Self::Custom(_) => ProblemCategory::Custom,
        }
    }

    pub fn custom_text(&self) -> Option<&str> {
        match self {
            Self::Fixed(_) => None,
            Self::Custom(text) => Some(text),
        }
    }
}

/// Identity strings reported by the transport on first contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: Option<String>,
    pub handle: Option<String>,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            handle: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    /// First word of the display name, for greetings.
    pub fn first_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
    }
}

/// Validated contact details, committed as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    pub name: String,
    pub age: u32,
    /// Normalized handle, without the leading `@`.
    pub handle: String,
}

/// One persisted intake record.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: String,
    pub display_name: Option<String>,
    pub handle: Option<String>,
    pub problem_category: Option<ProblemCategory>,
    pub custom_problem_text: Option<String>,
    pub contact_name: Option<String>,
    pub age: Option<u32>,
    pub contact_handle: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Complete iff all three contact fields are set.
    pub fn is_complete(&self) -> bool {
        self.contact_name.is_some() && self.age.is_some() && self.contact_handle.is_some()
    }
}

/// Stored problem fields for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredProblem {
    pub category: Option<ProblemCategory>,
    pub custom_text: Option<String>,
}

/// A complete lead, as listed in the stats report.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadSummary {
    pub user_id: String,
    pub contact_name: String,
    pub age: u32,
    pub contact_handle: String,
    pub problem: StoredProblem,
    pub created_at: DateTime<Utc>,
}

/// Aggregate numbers over the whole store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadStats {
    pub total_users: u64,
    pub complete_records: u64,
    /// Category counts, largest first.
    pub by_category: Vec<(ProblemCategory, u64)>,
    /// Most recent complete leads, newest first.
    pub recent: Vec<LeadSummary>,
}

impl LeadStats {
    /// Share of users who left contact details, in percent (one decimal).
    pub fn conversion_percent(&self) -> f64 {
        percent(self.complete_records, self.total_users)
    }
}

/// `part / whole` as a percentage rounded to one decimal; 0 when `whole` is 0.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 1000.0 / whole as f64).round() / 10.0
}

/// Backend-agnostic store of intake records.
///
/// Every method reports storage faults as `DatabaseError`; callers treat a
/// failure as "nothing changed".
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Apply pending schema migrations. Idempotent.
    async fn ensure_schema(&self) -> Result<(), DatabaseError>;

    /// Insert a record for `identity` unless one exists. Returns `true` when inserted.
    async fn create_if_absent(&self, identity: &UserIdentity) -> Result<bool, DatabaseError>;

    async fn exists(&self, user_id: &str) -> Result<bool, DatabaseError>;

    /// Overwrite the problem fields. A fixed category clears any custom text.
    async fn set_problem(
        &self,
        user_id: &str,
        selection: &ProblemSelection,
    ) -> Result<(), DatabaseError>;

    /// Write name, age and handle together, or none of them.
    async fn set_contact_info(
        &self,
        user_id: &str,
        contact: &ContactInfo,
    ) -> Result<(), DatabaseError>;

    async fn get_problem(&self, user_id: &str) -> Result<StoredProblem, DatabaseError>;

    async fn get_record(&self, user_id: &str) -> Result<Option<UserRecord>, DatabaseError>;

    async fn aggregate_stats(&self, recent_limit: usize) -> Result<LeadStats, DatabaseError>;

    /// All records, newest first.
    async fn export_all(&self) -> Result<Vec<UserRecord>, DatabaseError>;
}
