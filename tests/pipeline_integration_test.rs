//! End to end over in-memory doubles: plan, execute, enrich, load

mod common;

use std::sync::Arc;

use common::*;
use split_crawler::config::PlannerConfig;
use split_crawler::downstream::{DocumentLoader, EntityEnrichmentWorker};
use split_crawler::jobs::InMemoryJobStore;
use split_crawler::messaging::{CompletionMessage, SessionPurpose, SplitMessage};
use split_crawler::orchestration::{PlanOutcome, SplitPlanner};
use split_crawler::storage::{ArtifactStore, ProcessedLedger};
use split_crawler::test_helpers::{MemoryDocumentSink, RecordingAnnotator, ScriptedSource};

#[tokio::test]
async fn test_job_flows_through_every_stage() {
    let source = ScriptedSource::new()
        .with_total(25)
        .with_pages(0..2, 5)
        .with_page(10, 5);
    let h = ExecutorHarness::new(source);
    let jobs = Arc::new(InMemoryJobStore::default());
    let planner = SplitPlanner::new(
        jobs.clone(),
        h.source.clone(),
        h.connections.clone(),
        PlannerConfig::default(),
    );

    // plan: 25 items at page size 10 is three splits
    jobs.insert(Some("job-a"), 10, 0);
    assert_eq!(planner.plan_next_job().await.unwrap(), PlanOutcome::published("job-a", 3));
    assert!(jobs.is_empty());
    assert_eq!(h.broker.peek::<SplitMessage>(WORK_QUEUE).len(), 3);

    // execute every split
    let session = h.consume_session().await;
    for _ in 0..3 {
        assert!(h.executor.process_next(&session, WAIT).await.unwrap());
    }
    assert_eq!(h.broker.queue_depth(WORK_QUEUE), 0);
    let completions: Vec<CompletionMessage> = h.broker.peek(COMPLETION_QUEUE);
    let mut splits: Vec<u32> = completions.iter().map(|c| c.split_number).collect();
    splits.sort_unstable();
    assert_eq!(splits, vec![0, 1, 2]);
    assert!(h.raw.read_combined("job-a", 2).await.unwrap().is_none());
    assert_eq!(h.raw.read_summary("job-a", 2).await.unwrap().unwrap().total_articles_downloaded, 0);

    // enrich
    let augmented = ArtifactStore::new(h.dir.path().join("augmented"));
    let annotator = Arc::new(RecordingAnnotator::new());
    let enricher = EntityEnrichmentWorker::new(
        annotator.clone(),
        h.raw.clone(),
        augmented.clone(),
        h.connections.clone(),
        "rel_abs",
    );
    for _ in 0..3 {
        assert!(enricher.process_next(&session, WAIT).await.unwrap());
    }
    assert_eq!(h.broker.queue_depth(COMPLETION_QUEUE), 0);
    assert_eq!(h.broker.unacked_count(), 0);
    assert_eq!(annotator.calls().len(), 15);
    let enriched = augmented.read_combined("job-a", 0).await.unwrap().unwrap();
    assert!(enriched.collection.iter().all(|r| r["entities"][0]["text"] == "Abstract"));

    // load
    let sink = Arc::new(MemoryDocumentSink::new());
    let loader = DocumentLoader::new(
        augmented.root(),
        ProcessedLedger::new(augmented.root().join(".processed_files.json")),
        sink.clone(),
    );
    let report = loader.run_once().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.documents, 15);
    assert_eq!(sink.len(), 15);
    let doc = sink.get("10.1101/10.4").unwrap();
    assert_eq!(doc["category"], "Molecular Biology");
    assert_eq!(doc["rel_date"], "05/03/2020");

    session.close().await;
}

#[tokio::test]
async fn test_duplicate_split_is_absorbed_downstream() {
    let h = ExecutorHarness::new(ScriptedSource::new().with_page(0, 4));
    let augmented = ArtifactStore::new(h.dir.path().join("augmented"));
    let enricher = EntityEnrichmentWorker::new(
        Arc::new(RecordingAnnotator::new()),
        h.raw.clone(),
        augmented.clone(),
        h.connections.clone(),
        "rel_abs",
    );
    let sink = Arc::new(MemoryDocumentSink::new());
    let loader = DocumentLoader::new(
        augmented.root(),
        ProcessedLedger::new(augmented.root().join(".processed_files.json")),
        sink.clone(),
    );

    let publisher = h.connections.acquire(SessionPurpose::Publish).await.unwrap();
    publisher.declare(&h.connections.work_queue()).await.unwrap();
    let split = SplitMessage::new("job-a", 1, 0, 0);
    publisher.publish_message(WORK_QUEUE, &split).await.unwrap();
    publisher.publish_message(WORK_QUEUE, &split).await.unwrap();
    publisher.close().await;

    let session = h.consume_session().await;
    for _ in 0..2 {
        assert!(h.executor.process_next(&session, WAIT).await.unwrap());
    }
    let first_pass = loader.run_once().await.unwrap();
    for _ in 0..2 {
        assert!(enricher.process_next(&session, WAIT).await.unwrap());
    }
    let second_pass = loader.run_once().await.unwrap();
    let third_pass = loader.run_once().await.unwrap();

    assert_eq!(first_pass.candidates, 0);
    assert_eq!(second_pass.processed, 1);
    assert_eq!(third_pass.skipped, 1);
    assert_eq!(third_pass.processed, 0);
    assert_eq!(sink.len(), 4);
    assert_eq!(sink.upsert_calls(), 1);
    session.close().await;
}
