pub mod batch_ingest;
pub mod document_ingestion;

pub use batch_ingest::{BatchIngester, BatchSummary};
pub use document_ingestion::{
    calculate_file_hash, DeduplicationPolicy, DocumentIngestionRequest, DocumentIngestionService, IngestionResult,
};
