/// Idempotent schema statements, applied in order inside one transaction
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT NOT NULL,
        original_filename TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        storage_url TEXT,
        file_size INTEGER NOT NULL,
        user_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'uploaded',
        extracted_text TEXT,
        is_reference INTEGER NOT NULL DEFAULT 0,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CONSTRAINT check_document_status CHECK (status IN ('uploaded', 'processing', 'processed', 'error'))
    )
    "#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_user_file_hash ON documents(user_id, file_hash)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_documents_user_created ON documents(user_id, created_at)"#,
    r#"
    CREATE TABLE IF NOT EXISTS comparisons (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        reference_document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        target_document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        result TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        error_message TEXT,
        processing_time_ms INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CONSTRAINT check_comparison_status CHECK (status IN ('pending', 'processing', 'completed', 'failed'))
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_comparisons_user_created ON comparisons(user_id, created_at)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_comparisons_reference ON comparisons(reference_document_id)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_comparisons_target ON comparisons(target_document_id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS queue_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        task_type TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 5,
        status TEXT NOT NULL DEFAULT 'queued',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        scheduled_at INTEGER,
        error_message TEXT,
        claimed_at INTEGER,
        worker_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CONSTRAINT check_queue_status CHECK (status IN ('queued', 'processing', 'done', 'failed')),
        CONSTRAINT check_queue_max_attempts CHECK (max_attempts >= 1)
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_queue_items_claim ON queue_items(status, priority, created_at)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_queue_items_document ON queue_items(document_id)"#,
];
