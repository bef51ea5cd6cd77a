//! Concurrent curation actions against one database

mod helpers;

use hl_common::db::VariantSampleId;
use hl_ledger::aggregate::EvaluationCounts;
use hl_ledger::records::RecordKey;
use hl_ledger::verdict::{EvaluationValue, Pathogenicity};
use hl_ledger::CurationAction;
use tokio::task::JoinSet;

use helpers::{brca1, count_rows, rows, session, setup};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_creators_share_one_record() {
    let fx = setup().await;
    let key = RecordKey::evaluation(brca1(), 1);

    let mut join_set = JoinSet::new();
    for i in 0..8 {
        let records = fx.ledger.records().clone();
        let key = key.clone();
        join_set.spawn(async move { records.resolve_or_create(&key, &format!("user{}", i)).await });
    }

    let mut ids = Vec::new();
    while let Some(result) = join_set.join_next().await {
        ids.push(result.unwrap().unwrap());
    }

    ids.dedup();
    assert_eq!(ids.len(), 1, "racing creators returned {:?}", ids);
    assert_eq!(count_rows(fx.ledger.pool(), "variant_evaluations").await, 1);
    assert_eq!(count_rows(fx.ledger.pool(), "variant_evaluation_counts").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submitted_actions_converge_on_counters() {
    let fx = setup().await;

    let mut handles = Vec::new();
    for (actor, row, class) in [
        ("alice", 101, Pathogenicity::TypeIII),
        ("alice", 102, Pathogenicity::TypeIII),
        ("carol", 103, Pathogenicity::TypeV),
    ] {
        handles.push(fx.ledger.submit(
            session(actor),
            CurationAction::Evaluate {
                rows: vec![VariantSampleId(row)],
                value: EvaluationValue::Evaluation(class),
            },
        ));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let counts = fx.ledger.counter().load(&brca1()).await.unwrap();
    assert_eq!(counts, EvaluationCounts([0, 0, 2, 0, 1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_each_leave_history() {
    let fx = setup().await;
    let alice = session("alice");

    let mut join_set = JoinSet::new();
    for comment in ["first", "second", "third", "fourth"] {
        join_set.spawn(fx.ledger.submit(
            alice.clone(),
            CurationAction::Evaluate {
                rows: rows(&[104]),
                value: EvaluationValue::Comments(comment.to_string()),
            },
        ));
    }

    let mut record = None;
    while let Some(result) = join_set.join_next().await {
        let outcome = result.unwrap().unwrap().unwrap();
        record = Some(outcome.records[0]);
    }

    let history = fx.ledger.audit().load(record.unwrap()).await.unwrap();
    assert_eq!(history.len(), 4);
}
