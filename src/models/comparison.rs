use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ComparisonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonStatus::Pending => "pending",
            ComparisonStatus::Processing => "processing",
            ComparisonStatus::Completed => "completed",
            ComparisonStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ComparisonStatus::Completed | ComparisonStatus::Failed)
    }
}

impl fmt::Display for ComparisonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ComparisonStatus::Pending),
            "processing" => Ok(ComparisonStatus::Processing),
            "completed" => Ok(ComparisonStatus::Completed),
            "failed" => Ok(ComparisonStatus::Failed),
            other => Err(format!("unknown comparison status '{}'", other)),
        }
    }
}

/// Outcome of comparing a document against a reference template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub summary: String,
    pub differences: Vec<String>,
    pub suggestions: Vec<String>,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub id: i64,
    pub user_id: String,
    pub reference_document_id: i64,
    pub target_document_id: i64,
    pub result: Option<ComparisonResult>,
    pub status: ComparisonStatus,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComparison {
    pub user_id: String,
    pub reference_document_id: i64,
    pub target_document_id: i64,
}

impl NewComparison {
    pub fn into_comparison(self, id: i64, now: DateTime<Utc>) -> Comparison {
        Comparison {
            id,
            user_id: self.user_id,
            reference_document_id: self.reference_document_id,
            target_document_id: self.target_document_id,
            result: None,
            status: ComparisonStatus::Pending,
            error_message: None,
            processing_time_ms: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonUpdate {
    pub status: Option<ComparisonStatus>,
    pub result: Option<Option<ComparisonResult>>,
    pub error_message: Option<Option<String>>,
    pub processing_time_ms: Option<Option<i64>>,
}

impl ComparisonUpdate {
    pub fn completed(result: ComparisonResult, processing_time_ms: i64) -> Self {
        Self {
            status: Some(ComparisonStatus::Completed),
            result: Some(Some(result)),
            error_message: Some(None),
            processing_time_ms: Some(Some(processing_time_ms)),
        }
    }

    pub fn failed(error_message: impl Into<String>, processing_time_ms: i64) -> Self {
        Self {
            status: Some(ComparisonStatus::Failed),
            result: None,
            error_message: Some(Some(error_message.into())),
            processing_time_ms: Some(Some(processing_time_ms)),
        }
    }

    pub fn apply_to(&self, comparison: &mut Comparison, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            comparison.status = status;
        }
        if let Some(result) = &self.result {
            comparison.result = result.clone();
        }
        if let Some(error_message) = &self.error_message {
            comparison.error_message = error_message.clone();
        }
        if let Some(processing_time_ms) = self.processing_time_ms {
            comparison.processing_time_ms = processing_time_ms;
        }
        comparison.updated_at = now;
    }
}
