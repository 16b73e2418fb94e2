use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::TaskHandler;
use crate::db::Store;
use crate::errors::TaskError;
use crate::models::{DocumentStatus, DocumentUpdate, QueueItem, TaskType};
use crate::storage::StorageService;

const UTF8_BOM: char = '\u{feff}';

/// Turn raw file bytes into normalised plain text.
///
/// Fails for content that is not UTF-8 text: invalid sequences or NUL bytes
/// mean a binary format the worker cannot read.
pub fn extract_plain_text(bytes: &[u8]) -> Result<String, String> {
    if bytes.contains(&0) {
        return Err("content contains NUL bytes".to_string());
    }
    let text = std::str::from_utf8(bytes).map_err(|e| format!("content is not valid UTF-8: {}", e))?;
    Ok(normalize_whitespace(text.trim_start_matches(UTF8_BOM)))
}

/// Collapse runs of spaces and tabs, strip trailing whitespace per line and
/// keep at most one blank line between paragraphs
pub fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0;

    for raw_line in text.lines() {
        let line = raw_line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || lines.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }

    while lines.last().map_or(false, |line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Default handler for `extract_text` items: download the document, extract
/// its text and record the result on the document
pub struct TextExtractionHandler {
    store: Store,
    storage: StorageService,
}

impl TextExtractionHandler {
    pub fn new(store: Store, storage: StorageService) -> Self {
        Self { store, storage }
    }

    async fn mark_document(&self, document_id: i64, update: DocumentUpdate) -> Result<(), TaskError> {
        if !self.store.update_document(document_id, update).await? {
            return Err(TaskError::DocumentNotFound { document_id });
        }
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for TextExtractionHandler {
    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::ExtractText
    }

    async fn handle(&self, item: &QueueItem) -> Result<(), TaskError> {
        let document_id = item.document_id;
        let document = self
            .store
            .find_document(document_id)
            .await?
            .ok_or(TaskError::DocumentNotFound { document_id })?;

        self.mark_document(document_id, DocumentUpdate::status(DocumentStatus::Processing))
            .await?;

        let result = match self.storage.download(&document.filename).await {
            Ok(bytes) => extract_plain_text(&bytes).map_err(|details| TaskError::UnsupportedContent {
                document_id,
                details,
            }),
            Err(e) => Err(TaskError::from(e)),
        };

        match result {
            Ok(text) => {
                let mut counts = Map::new();
                counts.insert("word_count".to_string(), Value::from(text.split_whitespace().count()));
                counts.insert("character_count".to_string(), Value::from(text.chars().count()));

                let update = DocumentUpdate {
                    merge_metadata: Some(counts),
                    ..DocumentUpdate::processed(text)
                };
                self.mark_document(document_id, update).await?;
                info!(document_id, queue_id = item.id, "Extracted text from document");
                Ok(())
            }
            Err(e) => {
                warn!(document_id, queue_id = item.id, error = %e, "Text extraction failed");
                if let Err(mark_error) = self
                    .mark_document(document_id, DocumentUpdate::status(DocumentStatus::Error))
                    .await
                {
                    warn!(document_id, error = %mark_error, "Could not mark document as errored");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_bom_and_normalises() {
        let bytes = "\u{feff}  Mutual   NDA\r\n\r\n\r\n\tTerm:\t2 years  \n\n".as_bytes();
        assert_eq!(extract_plain_text(bytes).unwrap(), "Mutual NDA\n\nTerm: 2 years");
    }

    #[test]
    fn test_leading_blank_lines_dropped() {
        assert_eq!(normalize_whitespace("\n\n\nhello\nworld"), "hello\nworld");
    }

    #[test]
    fn test_binary_content_rejected() {
        assert!(extract_plain_text(&[0x25, 0x50, 0x44, 0x46, 0x00, 0x01]).is_err());
        assert!(extract_plain_text(&[0xff, 0xfe, 0xfd]).is_err());
    }

    #[test]
    fn test_empty_content_is_empty_text() {
        assert_eq!(extract_plain_text(b"").unwrap(), "");
        assert_eq!(extract_plain_text(b"  \n \n").unwrap(), "");
    }
}
