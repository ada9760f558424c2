use std::time::Duration;

use super::common::{Harness, TIMEOUT, at, declaration, seeded_id, waste_stream};
use crate::approval::{ApprovalFailureKind, ApprovalOutcome};
use crate::model::{DeclarationStatus, DeclarationType, SessionStatus};
use crate::ports::SessionStore;

fn failure(outcome: ApprovalOutcome) -> (ApprovalFailureKind, String) {
    match outcome {
        ApprovalOutcome::Rejected(failure) => (failure.kind, failure.message),
        ApprovalOutcome::Submitted { .. } => panic!("expected a rejection"),
    }
}

#[tokio::test]
async fn missing_declaration_is_reported_without_side_effects() {
    let harness = Harness::new();

    let outcome = harness
        .approval(TIMEOUT)
        .approve(&seeded_id(1), at(2025, 12, 1))
        .await
        .expect("approval runs");

    let (kind, message) = failure(outcome);
    assert_eq!(kind, ApprovalFailureKind::NotFound);
    assert!(message.starts_with("Melding niet gevonden"), "{message}");
    assert_eq!(harness.registry.calls(), 0);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn declaration_not_waiting_for_approval_is_not_submitted() {
    let harness = Harness::new();
    harness.store.add_waste_stream(waste_stream("087970000001", "proc-1"));
    for (sequence, status) in [
        (1, DeclarationStatus::Pending),
        (2, DeclarationStatus::Completed),
        (3, DeclarationStatus::Failed),
    ] {
        harness.store.seed_declaration(declaration(
            sequence,
            "087970000001",
            "102025",
            status,
            DeclarationType::FirstReceival,
        ));
    }

    for sequence in 1..=3 {
        let outcome = harness
            .approval(TIMEOUT)
            .approve(&seeded_id(sequence), at(2025, 12, 1))
            .await
            .expect("approval runs");
        let (kind, message) = failure(outcome);
        assert_eq!(kind, ApprovalFailureKind::NotAwaitingApproval);
        assert!(message.contains("staat niet op goedkeuring wachten"), "{message}");
    }

    assert_eq!(harness.registry.calls(), 0);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn malformed_period_fails_the_declaration_without_registry_call() {
    let harness = Harness::new();
    harness.store.add_waste_stream(waste_stream("087970000001", "proc-1"));
    let periods = ["1120", "132025", "AB2025", "002025", "1-2025"];
    for (sequence, raw) in (1..).zip(periods) {
        harness.store.seed_declaration(declaration(
            sequence,
            "087970000001",
            raw,
            DeclarationStatus::WaitingApproval,
            DeclarationType::FirstReceival,
        ));
    }

    for (sequence, raw) in (1..).zip(periods) {
        let id = seeded_id(sequence);
        let outcome = harness
            .approval(TIMEOUT)
            .approve(&id, at(2025, 12, 1))
            .await
            .expect("approval runs");

        let (kind, message) = failure(outcome);
        assert_eq!(kind, ApprovalFailureKind::InvalidPeriod, "{raw}");
        assert!(message.starts_with("Ongeldige periode"), "{message}");
        let stored = harness.store.declaration(&id).expect("declaration kept");
        assert_eq!(stored.status, DeclarationStatus::Failed);
        assert_eq!(stored.errors, vec![message]);
    }

    assert_eq!(harness.registry.calls(), 0);
}

#[tokio::test]
async fn unknown_waste_stream_fails_the_declaration_without_registry_call() {
    let harness = Harness::new();
    harness.store.seed_declaration(declaration(
        1,
        "087970000009",
        "102025",
        DeclarationStatus::WaitingApproval,
        DeclarationType::FirstReceival,
    ));

    let outcome = harness
        .approval(TIMEOUT)
        .approve(&seeded_id(1), at(2025, 12, 1))
        .await
        .expect("approval runs");

    let (kind, message) = failure(outcome);
    assert_eq!(kind, ApprovalFailureKind::UnknownWasteStream);
    assert_eq!(message, "Afvalstroom niet gevonden: 087970000009");
    let stored = harness.store.declaration(&seeded_id(1)).expect("declaration kept");
    assert_eq!(stored.status, DeclarationStatus::Failed);
    assert_eq!(harness.registry.calls(), 0);
}

#[tokio::test]
async fn approved_first_receival_is_submitted_and_pending() {
    let harness = Harness::new();
    harness.store.add_waste_stream(waste_stream("087970000001", "proc-1"));
    harness.store.seed_declaration(declaration(
        1,
        "087970000001",
        "102025",
        DeclarationStatus::WaitingApproval,
        DeclarationType::FirstReceival,
    ));

    let outcome = harness
        .approval(TIMEOUT)
        .approve(&seeded_id(1), at(2025, 12, 1))
        .await
        .expect("approval runs");

    let (declaration_id, session_id) = match outcome {
        ApprovalOutcome::Submitted {
            declaration_id,
            session_id,
        } => (declaration_id, session_id),
        ApprovalOutcome::Rejected(failure) => panic!("expected a submission, got {failure}"),
    };
    assert_eq!(declaration_id, seeded_id(1));
    assert_eq!(harness.registry.opened_sessions(), vec![session_id]);

    let batches = harness.registry.first_receivals();
    let [batch] = batches.as_slice() else {
        panic!("expected one batch, got {batches:?}");
    };
    let [message] = batch.as_slice() else {
        panic!("expected one message, got {batch:?}");
    };
    assert_eq!(message.reference, seeded_id(1).0);
    assert_eq!((message.period_month, message.period_year), (10, 2025));
    assert_eq!(message.processor_party, "proc-1");
    assert_eq!(message.total_weight, 4_200);

    let stored = harness.store.declaration(&seeded_id(1)).expect("declaration kept");
    assert_eq!(stored.status, DeclarationStatus::Pending);
    let session = SessionStore::find(harness.store.as_ref(), session_id)
        .expect("lookup")
        .expect("session stored");
    assert_eq!(session.status, SessionStatus::Pending);
    assert_eq!(session.declaration_ids, vec![seeded_id(1)]);
    assert_eq!(session.session_type, DeclarationType::FirstReceival);
}

#[tokio::test]
async fn approved_monthly_receival_passes_the_raw_period() {
    let harness = Harness::new();
    harness.store.add_waste_stream(waste_stream("087970000001", "proc-1"));
    harness.store.seed_declaration(declaration(
        1,
        "087970000001",
        "112025",
        DeclarationStatus::WaitingApproval,
        DeclarationType::MonthlyReceival,
    ));

    let outcome = harness
        .approval(TIMEOUT)
        .approve(&seeded_id(1), at(2025, 12, 1))
        .await
        .expect("approval runs");

    assert!(matches!(outcome, ApprovalOutcome::Submitted { .. }));
    let batches = harness.registry.monthly_receivals();
    assert_eq!(batches.len(), 1);
    assert!(batches.iter().flatten().all(|message| message.period == "112025"));
    assert!(harness.registry.first_receivals().is_empty());
}

#[tokio::test]
async fn registry_rejection_fails_the_declaration() {
    let harness = Harness::new();
    harness.store.add_waste_stream(waste_stream("087970000001", "proc-1"));
    harness.store.seed_declaration(declaration(
        1,
        "087970000001",
        "102025",
        DeclarationStatus::WaitingApproval,
        DeclarationType::FirstReceival,
    ));
    harness.registry.fail_submissions("certificate expired");

    let outcome = harness
        .approval(TIMEOUT)
        .approve(&seeded_id(1), at(2025, 12, 1))
        .await
        .expect("approval runs");

    let (kind, message) = failure(outcome);
    assert_eq!(kind, ApprovalFailureKind::Submission);
    assert!(message.starts_with("Fout bij het indienen van de melding"), "{message}");
    assert!(message.contains("certificate expired"), "{message}");
    let stored = harness.store.declaration(&seeded_id(1)).expect("declaration kept");
    assert_eq!(stored.status, DeclarationStatus::Failed);
    assert!(harness.store.sessions().is_empty());
}

#[tokio::test]
async fn slow_registry_counts_as_submission_failure() {
    let harness = Harness::new();
    harness.store.add_waste_stream(waste_stream("087970000001", "proc-1"));
    harness.store.seed_declaration(declaration(
        1,
        "087970000001",
        "102025",
        DeclarationStatus::WaitingApproval,
        DeclarationType::FirstReceival,
    ));
    harness.registry.delay_calls(Duration::from_secs(5));

    let outcome = harness
        .approval(Duration::from_millis(20))
        .approve(&seeded_id(1), at(2025, 12, 1))
        .await
        .expect("approval runs");

    let (kind, _message) = failure(outcome);
    assert_eq!(kind, ApprovalFailureKind::Submission);
    let stored = harness.store.declaration(&seeded_id(1)).expect("declaration kept");
    assert_eq!(stored.status, DeclarationStatus::Failed);
    assert!(harness.store.sessions().is_empty());
}

#[tokio::test]
async fn incomplete_waste_stream_fails_mapping_before_submission() {
    let harness = Harness::new();
    let mut stream = waste_stream("087970000001", "proc-1");
    stream.eural_code = String::new();
    harness.store.add_waste_stream(stream);
    harness.store.seed_declaration(declaration(
        1,
        "087970000001",
        "102025",
        DeclarationStatus::WaitingApproval,
        DeclarationType::FirstReceival,
    ));

    let outcome = harness
        .approval(TIMEOUT)
        .approve(&seeded_id(1), at(2025, 12, 1))
        .await
        .expect("approval runs");

    let (kind, message) = failure(outcome);
    assert_eq!(kind, ApprovalFailureKind::Submission);
    assert!(message.contains("EURAL"), "{message}");
    assert_eq!(harness.registry.calls(), 0);
}
