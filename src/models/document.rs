use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of an uploaded document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Uploaded,
    Processing,
    Processed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Error => "error",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "processed" => Ok(DocumentStatus::Processed),
            "error" => Ok(DocumentStatus::Error),
            other => Err(format!("unknown document status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    /// Storage key the bytes live under
    pub filename: String,
    pub original_filename: String,
    /// SHA-256 of the content, unique per owner
    pub file_hash: String,
    pub storage_url: Option<String>,
    pub file_size: i64,
    pub user_id: String,
    pub status: DocumentStatus,
    pub extracted_text: Option<String>,
    /// Reference templates are what uploads get compared against
    pub is_reference: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    pub original_filename: String,
    pub file_hash: String,
    pub storage_url: Option<String>,
    pub file_size: i64,
    pub user_id: String,
    pub status: DocumentStatus,
    pub is_reference: bool,
    pub metadata: serde_json::Value,
}

impl NewDocument {
    pub fn new(
        filename: impl Into<String>,
        original_filename: impl Into<String>,
        file_hash: impl Into<String>,
        file_size: i64,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            original_filename: original_filename.into(),
            file_hash: file_hash.into(),
            storage_url: None,
            file_size,
            user_id: user_id.into(),
            status: DocumentStatus::Uploaded,
            is_reference: false,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn into_document(self, id: i64, now: DateTime<Utc>) -> Document {
        Document {
            id,
            filename: self.filename,
            original_filename: self.original_filename,
            file_hash: self.file_hash,
            storage_url: self.storage_url,
            file_size: self.file_size,
            user_id: self.user_id,
            status: self.status,
            extracted_text: None,
            is_reference: self.is_reference,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` leaves a field untouched; nullable columns use
/// `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub filename: Option<String>,
    pub original_filename: Option<String>,
    pub file_hash: Option<String>,
    pub storage_url: Option<Option<String>>,
    pub file_size: Option<i64>,
    pub status: Option<DocumentStatus>,
    pub extracted_text: Option<Option<String>>,
    pub is_reference: Option<bool>,
    pub metadata: Option<serde_json::Value>,
    /// Top-level keys written into the stored metadata, applied after
    /// `metadata` in the same write. Other keys are kept.
    pub merge_metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl DocumentUpdate {
    pub fn status(status: DocumentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn processed(text: impl Into<String>) -> Self {
        Self {
            status: Some(DocumentStatus::Processed),
            extracted_text: Some(Some(text.into())),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, document: &mut Document, now: DateTime<Utc>) {
        if let Some(filename) = &self.filename {
            document.filename = filename.clone();
        }
        if let Some(original_filename) = &self.original_filename {
            document.original_filename = original_filename.clone();
        }
        if let Some(file_hash) = &self.file_hash {
            document.file_hash = file_hash.clone();
        }
        if let Some(storage_url) = &self.storage_url {
            document.storage_url = storage_url.clone();
        }
        if let Some(file_size) = self.file_size {
            document.file_size = file_size;
        }
        if let Some(status) = self.status {
            document.status = status;
        }
        if let Some(extracted_text) = &self.extracted_text {
            document.extracted_text = extracted_text.clone();
        }
        if let Some(is_reference) = self.is_reference {
            document.is_reference = is_reference;
        }
        if let Some(metadata) = &self.metadata {
            document.metadata = metadata.clone();
        }
        if let Some(entries) = &self.merge_metadata {
            if !document.metadata.is_object() {
                document.metadata = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(map) = &mut document.metadata {
                for (key, value) in entries {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        document.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Processed,
            DocumentStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>(), Ok(status));
        }
        assert!("deleted".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_update_clears_nullable_fields() {
        let now = Utc::now();
        let mut document = NewDocument::new("documents/a.txt", "a.txt", "abc", 3, "user-1").into_document(1, now);
        document.extracted_text = Some("old".to_string());

        let update = DocumentUpdate {
            extracted_text: Some(None),
            ..Default::default()
        };
        update.apply_to(&mut document, now);

        assert_eq!(document.extracted_text, None);
        assert_eq!(document.filename, "documents/a.txt");
    }

    #[test]
    fn test_merge_metadata_keeps_other_keys() {
        let now = Utc::now();
        let mut document = NewDocument::new("documents/a.txt", "a.txt", "abc", 3, "user-1").into_document(1, now);
        document.metadata = serde_json::json!({"source_path": "/imports/a.txt", "word_count": 1});

        let mut entries = serde_json::Map::new();
        entries.insert("word_count".to_string(), serde_json::json!(12));
        let update = DocumentUpdate {
            merge_metadata: Some(entries),
            ..Default::default()
        };
        update.apply_to(&mut document, now);

        assert_eq!(
            document.metadata,
            serde_json::json!({"source_path": "/imports/a.txt", "word_count": 12})
        );
    }
}
