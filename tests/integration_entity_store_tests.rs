use serde_json::json;

use docflow::db::{ComparisonRepository, DocumentRepository, QueueRepository};
use docflow::errors::StoreError;
use docflow::models::{
    ComparisonResult, ComparisonSort, ComparisonStatus, ComparisonUpdate, DocumentSort, DocumentStatus,
    DocumentUpdate, FindOptions, NewComparison, NewDocument, NewQueueItem, SortDirection, TaskType,
};

mod helpers;
use helpers::{all_stores, create_document};

#[tokio::test]
async fn test_metadata_merge_keeps_keys_written_in_between() {
    for backend in all_stores().await {
        let store = &backend.store;
        let mut new = NewDocument::new("documents/msa.txt", "msa.txt", "hash-msa", 512, "user-1");
        new.metadata = json!({ "source_path": "/imports/msa.txt" });
        let created = store.create_document(new).await.unwrap();

        // Someone tags the document after a reader took its copy
        let stale_copy = store.find_document(created.id).await.unwrap().unwrap();
        let tagged = DocumentUpdate {
            metadata: Some(json!({ "source_path": "/imports/msa.txt", "tag": "legal" })),
            ..Default::default()
        };
        assert!(store.update_document(created.id, tagged).await.unwrap());

        let mut counts = serde_json::Map::new();
        counts.insert("word_count".to_string(), json!(3));
        counts.insert("character_count".to_string(), json!(17));
        let update = DocumentUpdate {
            merge_metadata: Some(counts),
            ..DocumentUpdate::processed("Master services agreement")
        };
        assert!(store.update_document(stale_copy.id, update).await.unwrap());

        let stored = store.find_document(created.id).await.unwrap().unwrap();
        assert_eq!(
            stored.metadata,
            json!({
                "source_path": "/imports/msa.txt",
                "tag": "legal",
                "word_count": 3,
                "character_count": 17
            }),
            "{}",
            backend.name
        );
        assert_eq!(stored.status, DocumentStatus::Processed);
    }
}

#[tokio::test]
async fn test_document_crud_on_every_backend() {
    for backend in all_stores().await {
        let store = &backend.store;

        let mut new = NewDocument::new("documents/nda.txt", "nda.txt", "hash-nda", 2048, "user-1");
        new.metadata = json!({ "source": "upload" });
        let created = store.create_document(new).await.unwrap();

        assert!(created.id > 0, "{}", backend.name);
        assert_eq!(created.status, DocumentStatus::Uploaded, "{}", backend.name);
        assert_eq!(created.created_at, created.updated_at, "{}", backend.name);

        let found = store.find_document(created.id).await.unwrap().unwrap();
        assert_eq!(found, created, "{}", backend.name);

        let by_hash = store.find_document_by_hash("user-1", "hash-nda").await.unwrap();
        assert_eq!(by_hash.map(|d| d.id), Some(created.id), "{}", backend.name);
        assert!(store.find_document_by_hash("user-2", "hash-nda").await.unwrap().is_none());

        assert!(store
            .update_document(created.id, DocumentUpdate::processed("Mutual NDA"))
            .await
            .unwrap());
        let updated = store.find_document(created.id).await.unwrap().unwrap();
        assert_eq!(updated.status, DocumentStatus::Processed, "{}", backend.name);
        assert_eq!(updated.extracted_text.as_deref(), Some("Mutual NDA"), "{}", backend.name);
        assert_eq!(updated.metadata, json!({ "source": "upload" }), "{}", backend.name);
        assert!(updated.updated_at >= created.updated_at, "{}", backend.name);

        assert!(!store.update_document(9_999, DocumentUpdate::default()).await.unwrap());
        assert!(store.find_document(9_999).await.unwrap().is_none());

        assert!(store.delete_document(created.id).await.unwrap());
        assert!(!store.delete_document(created.id).await.unwrap(), "{}", backend.name);
        assert!(store.find_document(created.id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_duplicate_hash_per_owner_is_a_constraint_violation() {
    for backend in all_stores().await {
        let store = &backend.store;
        create_document(store, "user-1", "a.txt", "same-hash").await;

        let error = store
            .create_document(NewDocument::new("documents/b.txt", "b.txt", "same-hash", 1, "user-1"))
            .await
            .unwrap_err();
        assert!(error.is_constraint_violation(), "{}: {:?}", backend.name, error);

        // Other owners may hold the same content
        store
            .create_document(NewDocument::new("documents/c.txt", "c.txt", "same-hash", 1, "user-2"))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_find_by_user_ordering_and_paging_match() {
    let mut listings = Vec::new();

    for backend in all_stores().await {
        let store = &backend.store;
        let first = create_document(store, "user-1", "first.txt", "h1").await;
        let second = create_document(store, "user-1", "second.txt", "h2").await;
        let third = create_document(store, "user-1", "third.txt", "h3").await;
        create_document(store, "user-2", "other.txt", "h4").await;

        let newest_first = store
            .find_documents_by_user("user-1", FindOptions::default())
            .await
            .unwrap();
        let ids: Vec<i64> = newest_first.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id], "{}", backend.name);

        let page = store
            .find_documents_by_user("user-1", FindOptions::default().page(2, 1))
            .await
            .unwrap();
        let page_ids: Vec<i64> = page.iter().map(|d| d.id).collect();
        assert_eq!(page_ids, vec![second.id, first.id], "{}", backend.name);

        let by_name = store
            .find_documents_by_user(
                "user-1",
                FindOptions::ordered(DocumentSort::OriginalFilename, SortDirection::Asc),
            )
            .await
            .unwrap();
        let names: Vec<&str> = by_name.iter().map(|d| d.original_filename.as_str()).collect();
        assert_eq!(names, vec!["first.txt", "second.txt", "third.txt"], "{}", backend.name);

        let past_end = store
            .find_documents_by_user("user-1", FindOptions::default().page(10, 5))
            .await
            .unwrap();
        assert!(past_end.is_empty(), "{}", backend.name);

        listings.push(names.iter().map(|name| name.to_string()).collect::<Vec<_>>());
    }

    assert_eq!(listings[0], listings[1]);
}

#[tokio::test]
async fn test_comparison_lifecycle() {
    for backend in all_stores().await {
        let store = &backend.store;
        let reference = create_document(store, "user-1", "template.txt", "ref").await;
        let target = create_document(store, "user-1", "contract.txt", "target").await;

        let comparison = store
            .create_comparison(NewComparison {
                user_id: "user-1".to_string(),
                reference_document_id: reference.id,
                target_document_id: target.id,
            })
            .await
            .unwrap();
        assert_eq!(comparison.status, ComparisonStatus::Pending, "{}", backend.name);
        assert!(comparison.result.is_none());

        let result = ComparisonResult {
            summary: "Term differs".to_string(),
            differences: vec!["Term: 2 years vs 3 years".to_string()],
            suggestions: vec!["Align the term".to_string()],
            similarity_score: 0.5,
        };
        assert!(store
            .update_comparison(comparison.id, ComparisonUpdate::completed(result.clone(), 420))
            .await
            .unwrap());

        let stored = store.find_comparison(comparison.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ComparisonStatus::Completed, "{}", backend.name);
        assert_eq!(stored.result, Some(result), "{}", backend.name);
        assert_eq!(stored.processing_time_ms, Some(420), "{}", backend.name);

        let listed = store
            .find_comparisons_by_user(
                "user-1",
                FindOptions::ordered(ComparisonSort::CreatedAt, SortDirection::Desc),
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 1, "{}", backend.name);

        assert!(store.delete_comparison(comparison.id).await.unwrap());
        assert!(store.find_comparison(comparison.id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_comparison_requires_existing_documents() {
    for backend in all_stores().await {
        let store = &backend.store;
        let reference = create_document(store, "user-1", "template.txt", "ref").await;

        let error = store
            .create_comparison(NewComparison {
                user_id: "user-1".to_string(),
                reference_document_id: reference.id,
                target_document_id: 9_999,
            })
            .await
            .unwrap_err();
        assert!(
            matches!(error, StoreError::ConstraintViolation { .. }),
            "{}: {:?}",
            backend.name,
            error
        );
    }
}

#[tokio::test]
async fn test_delete_document_cascades_identically() {
    for backend in all_stores().await {
        let store = &backend.store;
        let reference = create_document(store, "user-1", "template.txt", "ref").await;
        let target = create_document(store, "user-1", "contract.txt", "target").await;
        let unrelated = create_document(store, "user-1", "other.txt", "other").await;

        let comparison = store
            .create_comparison(NewComparison {
                user_id: "user-1".to_string(),
                reference_document_id: reference.id,
                target_document_id: target.id,
            })
            .await
            .unwrap();

        for document_id in [target.id, unrelated.id] {
            store
                .create_queue_item(NewQueueItem {
                    document_id,
                    task_type: TaskType::ExtractText,
                    priority: 5,
                    max_attempts: 3,
                    scheduled_at: None,
                })
                .await
                .unwrap();
        }

        assert!(store.delete_document(target.id).await.unwrap());

        assert!(
            store.find_comparison(comparison.id).await.unwrap().is_none(),
            "{}",
            backend.name
        );
        assert!(store.find_queue_items_by_document(target.id).await.unwrap().is_empty());
        assert_eq!(
            store.find_queue_items_by_document(unrelated.id).await.unwrap().len(),
            1,
            "{}",
            backend.name
        );
        assert!(store.find_document(reference.id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_queue_item_requires_existing_document() {
    for backend in all_stores().await {
        let error = backend
            .store
            .create_queue_item(NewQueueItem {
                document_id: 42,
                task_type: TaskType::ExtractText,
                priority: 5,
                max_attempts: 3,
                scheduled_at: None,
            })
            .await
            .unwrap_err();
        assert!(error.is_constraint_violation(), "{}: {:?}", backend.name, error);
    }
}
