// tests/retrieval_pipeline.rs
// Read path end-to-end: vector search -> temporal scoring -> MMR

mod common;

use common::TableEmbedder;
use engram::decay::DecayConfig;
use engram::mmr::MmrConfig;
use engram::retrieval::Retriever;
use engram::store::get_memory_sync;
use engram::store::test_support::{TEST_DIM, TestMemory, insert_test_memory, setup_test_pool};
use std::sync::Arc;

fn embedder(entries: Vec<(&'static str, Vec<f32>)>) -> Arc<TableEmbedder> {
    Arc::new(TableEmbedder::new(TEST_DIM, entries))
}

#[tokio::test]
async fn fresh_memory_outranks_stale_twin() {
    let pool = setup_test_pool().await;
    let stale = insert_test_memory(
        &pool,
        TestMemory::new("old advice", &[1.0, 0.0, 0.0, 0.0]).age_days(60),
    )
    .await;
    let fresh = insert_test_memory(
        &pool,
        TestMemory::new("new advice", &[1.0, 0.0, 0.0, 0.0]).age_days(0),
    )
    .await;

    let retriever = Retriever::new(
        pool.clone(),
        embedder(vec![("advice", vec![1.0, 0.0, 0.0, 0.0])]),
        DecayConfig::default(),
        MmrConfig {
            enabled: false,
            ..MmrConfig::default()
        },
    );

    let results = retriever.search("advice", 10).await.expect("search");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].memory.id, fresh, "decay demotes the 60-day-old twin");
    assert_eq!(results[1].memory.id, stale);
    assert!(results[0].similarity > results[1].similarity);

    let breakdown = results[1].temporal.expect("temporal breakdown attached");
    assert!(breakdown.decay_factor < 1.0);
}

#[tokio::test]
async fn tombstoned_memories_never_surface() {
    let pool = setup_test_pool().await;
    let keep = insert_test_memory(
        &pool,
        TestMemory::new("survivor note", &[1.0, 0.0, 0.0, 0.0]),
    )
    .await;
    let gone = insert_test_memory(
        &pool,
        TestMemory::new("retired note", &[1.0, 0.0, 0.0, 0.0]),
    )
    .await;
    pool.interact(move |conn| {
        engram::store::invalidate_memory_sync(conn, gone, keep, chrono::Utc::now())
    })
    .await
    .unwrap();

    let retriever = Retriever::new(
        pool.clone(),
        embedder(vec![("note", vec![1.0, 0.0, 0.0, 0.0])]),
        DecayConfig::default(),
        MmrConfig::default(),
    );

    let results = retriever.search("note", 10).await.expect("search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.id, keep);
}

#[tokio::test]
async fn retrieval_records_access() {
    let pool = setup_test_pool().await;
    let id = insert_test_memory(
        &pool,
        TestMemory::new("tracked note", &[1.0, 0.0, 0.0, 0.0]),
    )
    .await;

    let retriever = Retriever::new(
        pool.clone(),
        embedder(vec![("note", vec![1.0, 0.0, 0.0, 0.0])]),
        DecayConfig::default(),
        MmrConfig::default(),
    );
    retriever.search("note", 5).await.expect("search");
    retriever.search("note", 5).await.expect("search");

    pool.interact(move |conn| {
        let memory = get_memory_sync(conn, id)?.expect("exists");
        assert_eq!(memory.access_count, 2);
        assert!(memory.last_accessed.is_some());
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn mmr_promotes_diverse_results() {
    let pool = setup_test_pool().await;
    let anchor = insert_test_memory(
        &pool,
        TestMemory::new("anchor fact", &[1.0, 0.0, 0.0, 0.0]),
    )
    .await;
    let near_dup = insert_test_memory(
        &pool,
        TestMemory::new("anchor fact restated", &[0.995, 0.0999, 0.0, 0.0]),
    )
    .await;
    let diverse = insert_test_memory(
        &pool,
        TestMemory::new("orthogonal fact", &[0.0, 1.0, 0.0, 0.0]),
    )
    .await;

    // Query sits between the clusters so redundancy, not relevance,
    // decides second place
    let query_vec = vec![0.707, 0.707, 0.0, 0.0];
    let retriever = Retriever::new(
        pool.clone(),
        embedder(vec![("facts about", query_vec)]),
        DecayConfig::default(),
        MmrConfig::default(),
    );

    let results = retriever.search("facts about", 10).await.expect("search");
    let ids: Vec<i64> = results.iter().map(|r| r.memory.id).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], near_dup, "highest raw similarity wins first pick");
    assert_eq!(ids[1], diverse, "diversity outranks the near-duplicate");
    assert_eq!(ids[2], anchor);
}

#[tokio::test]
async fn limit_is_respected() {
    let pool = setup_test_pool().await;
    for i in 0..6 {
        insert_test_memory(
            &pool,
            TestMemory::new(&format!("note {i}"), &[1.0, 0.01 * i as f32, 0.0, 0.0]),
        )
        .await;
    }

    let retriever = Retriever::new(
        pool.clone(),
        embedder(vec![("note", vec![1.0, 0.0, 0.0, 0.0])]),
        DecayConfig::default(),
        MmrConfig::default(),
    );

    let results = retriever.search("note", 2).await.expect("search");
    assert_eq!(results.len(), 2);

    let none = retriever.search("note", 0).await.expect("search");
    assert!(none.is_empty());
}
