//! Shared evaluation workflow: counters, history, permissions, identity

mod helpers;

use hl_common::db::VariantSampleId;
use hl_common::events::LedgerEvent;
use hl_common::Error;
use hl_ledger::aggregate::EvaluationCounts;
use hl_ledger::audit::{AuditVerb, History};
use hl_ledger::verdict::{
    EvaluationField, EvaluationValue, Insilico, Pathogenicity, Reporting, Segregation,
};
use hl_ledger::view_cache::ViewRow;
use hl_ledger::CommentTarget;

use helpers::{brca1, brca2, classified_records, count_rows, rows, session, setup};

fn class(p: Pathogenicity) -> EvaluationValue {
    EvaluationValue::Evaluation(p)
}

#[tokio::test]
async fn test_counters_follow_reclassification() {
    let fx = setup().await;
    let alice = session("alice");
    let carol = session("carol");

    let outcome = fx
        .ledger
        .evaluate(&alice, rows(&[101]), class(Pathogenicity::TypeIII))
        .await
        .unwrap();
    assert_eq!(outcome.counts, vec![(brca1(), EvaluationCounts([0, 0, 1, 0, 0]))]);

    // A second curator classifies the same variant in another sample
    let outcome = fx
        .ledger
        .evaluate(&carol, rows(&[102]), class(Pathogenicity::TypeIII))
        .await
        .unwrap();
    assert_eq!(outcome.counts[0].1, EvaluationCounts([0, 0, 2, 0, 0]));

    let outcome = fx
        .ledger
        .evaluate(&alice, rows(&[101]), class(Pathogenicity::TypeV))
        .await
        .unwrap();
    assert_eq!(outcome.counts[0].1, EvaluationCounts([0, 0, 1, 0, 1]));

    let stored = fx.ledger.counter().load(&brca1()).await.unwrap();
    assert_eq!(stored, EvaluationCounts([0, 0, 1, 0, 1]));
    assert_eq!(stored.total(), classified_records(fx.ledger.pool(), &brca1()).await);

    // The other variant is untouched
    assert_eq!(fx.ledger.counter().load(&brca2()).await.unwrap(), EvaluationCounts::default());
}

#[tokio::test]
async fn test_unsetting_class_removes_it_from_counters() {
    let fx = setup().await;
    let alice = session("alice");

    fx.ledger
        .evaluate(&alice, rows(&[101, 102]), class(Pathogenicity::TypeII))
        .await
        .unwrap();
    let outcome = fx
        .ledger
        .evaluate(&alice, rows(&[101]), class(Pathogenicity::NotEvaluated))
        .await
        .unwrap();

    assert_eq!(outcome.counts[0].1, EvaluationCounts([0, 1, 0, 0, 0]));
    assert_eq!(classified_records(fx.ledger.pool(), &brca1()).await, 1);
}

#[tokio::test]
async fn test_check_writes_do_not_touch_counters() {
    let fx = setup().await;
    let alice = session("alice");

    let outcome = fx
        .ledger
        .evaluate(&alice, rows(&[101]), EvaluationValue::Insilico(Insilico::Ok))
        .await
        .unwrap();

    assert!(outcome.counts.is_empty());
    assert_eq!(outcome.records.len(), 1);
    // The counters row is born with the first evaluation record
    assert_eq!(count_rows(fx.ledger.pool(), "variant_evaluation_counts").await, 1);
    assert_eq!(fx.ledger.counter().load(&brca1()).await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_each_write_appends_one_history_line() {
    let fx = setup().await;
    let alice = session("alice");

    let writes = [
        class(Pathogenicity::TypeIV),
        EvaluationValue::Insilico(Insilico::Suspect),
        EvaluationValue::Reporting(Reporting::Yes),
        EvaluationValue::Segregation(Segregation::Coseg),
        EvaluationValue::Comments("seen in two relatives".to_string()),
    ];
    let mut record = None;
    for value in writes.iter().cloned() {
        let outcome = fx.ledger.evaluate(&alice, rows(&[101]), value).await.unwrap();
        record = Some(outcome.records[0]);
    }

    let history = fx.ledger.audit().load(record.unwrap()).await.unwrap();
    assert_eq!(history.len(), writes.len());

    let entries: Vec<_> = history.entries().collect();
    assert!(entries[0].concerns(EvaluationField::Evaluation));
    assert_eq!(entries[0].value, "type IV");
    assert_eq!(entries[1].subject, "check_insilico");
    assert_eq!(entries[1].value, "SUSPECT");
    assert_eq!(entries[4].verb, AuditVerb::ModifiedTo);
    assert!(entries.iter().all(|e| e.actor == "alice"));
}

#[tokio::test]
async fn test_field_stamps_and_details() {
    let fx = setup().await;
    let alice = session("alice");

    let outcome = fx
        .ledger
        .evaluate(&alice, rows(&[101]), EvaluationValue::Reporting(Reporting::No))
        .await
        .unwrap();
    let entry = outcome.audit.unwrap();

    let occurrence = fx.ledger.identity().resolve(VariantSampleId(101)).await.unwrap();
    let details = fx.ledger.details().evaluation(&occurrence).await.unwrap();

    assert_eq!(details.summary.reporting, Reporting::No);
    assert_eq!(details.summary.evaluation, Pathogenicity::NotEvaluated);
    let stamp = &details.stamps[&EvaluationField::Reporting];
    assert_eq!(stamp.username.as_deref(), Some("alice"));
    assert_eq!(stamp.date.as_deref(), Some(entry.timestamp.as_str()));
    assert!(details.stamps[&EvaluationField::Evaluation].username.is_none());
    assert_eq!(details.history.len(), 1);
}

#[tokio::test]
async fn test_details_of_never_evaluated_row() {
    let fx = setup().await;
    let occurrence = fx.ledger.identity().resolve(VariantSampleId(105)).await.unwrap();

    let details = fx.ledger.details().evaluation(&occurrence).await.unwrap();

    assert!(details.summary.record_id.is_none());
    assert!(details.history.is_empty());
    assert_eq!(details.counts, EvaluationCounts::default());
    assert_eq!(count_rows(fx.ledger.pool(), "variant_evaluations").await, 0);
}

#[tokio::test]
async fn test_denied_action_leaves_no_trace() {
    let fx = setup().await;
    let bob = session("bob");
    let mut events = fx.ledger.bus().subscribe();

    // bob is not a member of project 2
    let result = fx
        .ledger
        .evaluate(&bob, rows(&[101, 102]), class(Pathogenicity::TypeI))
        .await;

    assert!(matches!(result, Err(Error::Unauthorized(_))));
    assert_eq!(count_rows(fx.ledger.pool(), "variant_evaluations").await, 0);
    assert_eq!(count_rows(fx.ledger.pool(), "variant_evaluation_counts").await, 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_member_and_admin_may_modify() {
    let fx = setup().await;
    let gate = fx.ledger.permissions();

    assert!(gate.can_modify("bob", &rows(&[101, 104])).await.unwrap());
    assert!(!gate.can_modify("bob", &rows(&[101, 105])).await.unwrap());
    assert!(gate.can_modify("carol", &rows(&[103])).await.unwrap());
    assert!(!gate.can_modify("mallory", &rows(&[101])).await.unwrap());

    fx.ledger
        .evaluate(&session("carol"), rows(&[103]), class(Pathogenicity::TypeI))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_missing_row_is_not_found() {
    let fx = setup().await;

    let result = fx
        .ledger
        .evaluate(&session("carol"), rows(&[101, 999]), class(Pathogenicity::TypeII))
        .await;

    match result {
        Err(e @ Error::NotFound(_)) => {
            assert_eq!(e.user_message(), "Variant not found in the database");
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert_eq!(count_rows(fx.ledger.pool(), "variant_evaluations").await, 0);
}

#[tokio::test]
async fn test_duplicate_rows_write_once() {
    let fx = setup().await;

    let outcome = fx
        .ledger
        .evaluate(&session("alice"), rows(&[101, 101]), class(Pathogenicity::TypeIII))
        .await
        .unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.counts[0].1, EvaluationCounts([0, 0, 1, 0, 0]));
    let history = fx.ledger.audit().load(outcome.records[0]).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_selection_across_variants_recomputes_each() {
    let fx = setup().await;

    let outcome = fx
        .ledger
        .evaluate(&session("alice"), rows(&[101, 104, 105]), class(Pathogenicity::TypeV))
        .await
        .unwrap();

    assert_eq!(outcome.records.len(), 3);
    assert_eq!(outcome.counts.len(), 2);
    assert_eq!(fx.ledger.counter().load(&brca2()).await.unwrap(), EvaluationCounts([0, 0, 0, 0, 2]));
    assert_eq!(fx.ledger.counter().load(&brca1()).await.unwrap(), EvaluationCounts([0, 0, 0, 0, 1]));
}

#[tokio::test]
async fn test_displayed_rows_refresh() {
    let fx = setup().await;
    let view = fx.ledger.view();
    for id in [101, 102, 104] {
        let occurrence = fx.ledger.identity().resolve(VariantSampleId(id)).await.unwrap();
        view.display(ViewRow::new(occurrence)).await;
    }

    fx.ledger
        .evaluate(&session("alice"), rows(&[101]), class(Pathogenicity::TypeIII))
        .await
        .unwrap();

    assert_eq!(view.value(VariantSampleId(101), "evaluation").await.as_deref(), Some("3"));
    assert_eq!(view.value(VariantSampleId(101), "evaluation_username").await.as_deref(), Some("alice"));
    // Same variant in another sample: counters only
    assert_eq!(view.value(VariantSampleId(102), "evaluation").await, None);
    assert_eq!(
        view.value(VariantSampleId(102), "num_evaluated_as_type_3").await.as_deref(),
        Some("1")
    );
    assert_eq!(view.value(VariantSampleId(104), "num_evaluated_as_type_3").await, None);
}

#[tokio::test]
async fn test_displayed_history_follows_writes() {
    let fx = setup().await;
    let view = fx.ledger.view();
    let occurrence = fx.ledger.identity().resolve(VariantSampleId(101)).await.unwrap();
    view.display(ViewRow::new(occurrence)).await;
    let alice = session("alice");

    fx.ledger
        .evaluate(&alice, rows(&[101]), class(Pathogenicity::TypeIII))
        .await
        .unwrap();
    let outcome = fx
        .ledger
        .evaluate(&alice, rows(&[101]), EvaluationValue::Insilico(Insilico::Ok))
        .await
        .unwrap();

    let shown = view.value(VariantSampleId(101), "history").await.unwrap();
    let stored: String = sqlx::query_scalar("SELECT history FROM variant_evaluations WHERE id = ?")
        .bind(outcome.records[0].0)
        .fetch_one(fx.ledger.pool())
        .await
        .unwrap();
    assert_eq!(shown, stored);
    assert_eq!(History::from_blob(&shown).len(), 2);
}

#[tokio::test]
async fn test_failed_recount_rolls_back_classification() {
    let fx = setup().await;
    let pool = fx.ledger.pool();
    let view = fx.ledger.view();
    let occurrence = fx.ledger.identity().resolve(VariantSampleId(101)).await.unwrap();
    view.display(ViewRow::new(occurrence)).await;

    sqlx::query(
        "CREATE TRIGGER counters_offline BEFORE UPDATE ON variant_evaluation_counts \
         BEGIN SELECT RAISE(ABORT, 'counters offline'); END",
    )
    .execute(pool)
    .await
    .unwrap();

    let result = fx
        .ledger
        .evaluate(&session("alice"), rows(&[101]), class(Pathogenicity::TypeIII))
        .await;

    match result {
        Err(e @ Error::Storage(_)) => assert_eq!(e.user_message(), "Cannot update database"),
        other => panic!("expected a storage failure, got {:?}", other),
    }

    // The record may exist from lazy creation, but carries neither class nor history
    assert_eq!(classified_records(pool, &brca1()).await, 0);
    let histories: Vec<String> = sqlx::query_scalar("SELECT history FROM variant_evaluations")
        .fetch_all(pool)
        .await
        .unwrap();
    assert!(histories.iter().all(|h| h.is_empty()));
    assert_eq!(fx.ledger.counter().load(&brca1()).await.unwrap().total(), 0);
    assert_eq!(view.value(VariantSampleId(101), "evaluation").await, None);
}

#[tokio::test]
async fn test_empty_selection_is_rejected() {
    let fx = setup().await;
    let alice = session("alice");

    let result = fx
        .ledger
        .evaluate(&alice, rows(&[]), class(Pathogenicity::TypeIII))
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    let result = fx
        .ledger
        .set_public_comment(&alice, rows(&[]), CommentTarget::Gene, "LoF gene")
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    assert_eq!(count_rows(fx.ledger.pool(), "variant_evaluations").await, 0);
    assert_eq!(count_rows(fx.ledger.pool(), "gene_comments").await, 0);
}

#[tokio::test]
async fn test_events_broadcast_for_action() {
    let fx = setup().await;
    let mut events = fx.ledger.bus().subscribe();

    fx.ledger
        .evaluate(&session("alice"), rows(&[101]), class(Pathogenicity::TypeII))
        .await
        .unwrap();

    let mut created = 0;
    let mut recomputed = 0;
    let mut updated = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            LedgerEvent::RecordCreated { family, actor, .. } => {
                assert_eq!(family, "variant_evaluation");
                assert_eq!(actor, "alice");
                created += 1;
            }
            LedgerEvent::CountersRecomputed { counts, .. } => {
                assert_eq!(counts, [0, 1, 0, 0, 0]);
                recomputed += 1;
            }
            LedgerEvent::AnnotationUpdated { .. } => updated += 1,
        }
    }
    assert_eq!(created, 1);
    assert_eq!(recomputed, 1);
    // 5 counters + value, username, date and history of the written field
    assert_eq!(updated, 9);
}

#[tokio::test]
async fn test_other_evaluations_tally() {
    let fx = setup().await;
    let carol = session("carol");
    fx.ledger
        .evaluate(&carol, rows(&[101]), class(Pathogenicity::TypeIII))
        .await
        .unwrap();
    fx.ledger
        .evaluate(&carol, rows(&[102]), class(Pathogenicity::TypeV))
        .await
        .unwrap();
    fx.ledger
        .evaluate(&carol, rows(&[102]), EvaluationValue::Insilico(Insilico::Ok))
        .await
        .unwrap();

    let evaluated = fx.ledger.details().other_evaluations(&brca1(), false).await.unwrap();
    assert_eq!(evaluated.rows.len(), 2);
    assert_eq!(evaluated.rows[0].sample, "A");
    assert_eq!(evaluated.rows[0].evaluated_by.username.as_deref(), Some("carol"));
    assert_eq!(evaluated.tallies["evaluation"]["type III"], 1);
    assert_eq!(evaluated.tallies["evaluation"]["type V"], 1);
    assert_eq!(evaluated.tallies["check_insilico"]["OK"], 1);
    assert_eq!(evaluated.tallies["check_insilico"]["NOT_CHECKED"], 1);

    let all = fx.ledger.details().other_evaluations(&brca1(), true).await.unwrap();
    assert_eq!(all.rows.len(), 3);
    assert!(all.rows[2].summary.record_id.is_none());
    assert_eq!(all.tallies["evaluation"]["not evaluated"], 1);
}

#[tokio::test]
async fn test_resolve_selection_dedupes_and_orders() {
    let fx = setup().await;

    let resolved = fx
        .ledger
        .identity()
        .resolve_all(&rows(&[105, 101, 105]))
        .await
        .unwrap();

    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[0].id, VariantSampleId(101));
    assert_eq!(resolved[0].sample, "A");
    assert_eq!(resolved[1].variant, brca2());

    let occurrences = fx.ledger.identity().occurrences_of(&brca1()).await.unwrap();
    assert_eq!(occurrences.len(), 3);
}

#[tokio::test]
async fn test_appended_line_follows_existing_history() {
    let fx = setup().await;
    let outcome = fx
        .ledger
        .evaluate(&session("alice"), rows(&[104]), class(Pathogenicity::TypeI))
        .await
        .unwrap();
    let record = outcome.records[0];

    let note = hl_ledger::audit::AuditEntry::for_write(
        &EvaluationValue::Comments("reviewed at tumour board".to_string()),
        "carol",
        hl_common::time::now(),
        &fx.ledger.settings().history_date_format,
    );
    fx.ledger.audit().append(record, &note).await.unwrap();

    let history = fx.ledger.audit().load(record).await.unwrap();
    assert_eq!(history.len(), 2);
    let entries: Vec<_> = history.entries().collect();
    assert_eq!(entries[0], &outcome.audit.unwrap());
    assert_eq!(entries[1], &note);
}
