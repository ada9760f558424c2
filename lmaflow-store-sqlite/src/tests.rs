use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::params;
use uuid::Uuid;

use lmaflow_core::model::{
    DeclarationId, DeclarationStatus, DeclarationType, JobStatus, JobType, LmaDeclaration,
    LmaDeclarationSession, SessionStatus, WasteDeclarationJob, WasteStreamNumber,
    WeightTicketLine,
};
use lmaflow_core::period::Period;
use lmaflow_core::ports::{
    DeclarationStore, DetectionWrite, JobStore, SessionStore, StoreError, WasteStreams,
    WeightTicketLines,
};

use super::SqliteStore;

fn store() -> SqliteStore {
    SqliteStore::open_in_memory().expect("in-memory database")
}

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn period(month: u32, year: i32) -> Period {
    Period::new(month, year).expect("valid period")
}

fn number(raw: &str) -> WasteStreamNumber {
    WasteStreamNumber(raw.to_owned())
}

fn add_line(store: &SqliteStore, stream: &str, weight_kg: i64, weighed: (i32, u32, u32)) {
    let (year, month, day) = weighed;
    let weighed_at = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(10, 30, 0))
        .expect("valid date");
    store
        .conn()
        .execute(
            "INSERT INTO weight_ticket_lines (waste_stream_number, weight_kg, carrier, weighed_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![stream, weight_kg, "transport-1", weighed_at],
        )
        .expect("line inserted");
}

fn declaration(sequence: u64, stream: &str, status: DeclarationStatus) -> LmaDeclaration {
    LmaDeclaration {
        id: DeclarationId::from_sequence(sequence),
        waste_stream_number: number(stream),
        period: "112025".to_owned(),
        transporters: vec!["transport-1".to_owned(), "transport-2".to_owned()],
        total_weight: 4_200,
        total_shipments: 3,
        declaration_type: DeclarationType::FirstReceival,
        status,
        amice_uuid: None,
        errors: Vec::new(),
        created_at: at(2025, 12, 1),
    }
}

#[test]
fn declaration_ids_are_never_reused() {
    let store = store();

    let first = store.next_declaration_id().expect("first id");
    let second = store.next_declaration_id().expect("second id");

    assert_eq!(first.0, "000000000001");
    assert_eq!(second.0, "000000000002");
}

#[test]
fn declarations_keep_every_field() {
    let store = store();
    let mut failed = declaration(1, "087970000001", DeclarationStatus::Pending);
    failed.fail(["EURAL_INVALID: Euralcode onbekend"]);
    let mut completed = declaration(2, "087970000002", DeclarationStatus::Pending);
    completed.complete(Uuid::new_v4());

    store
        .save_all(&[failed.clone(), completed.clone()])
        .expect("saved");

    assert_eq!(
        DeclarationStore::find(&store, &failed.id).expect("lookup"),
        Some(failed.clone())
    );
    assert_eq!(
        store
            .find_many(&[
                completed.id.clone(),
                DeclarationId::from_sequence(99),
                failed.id.clone(),
            ])
            .expect("lookup"),
        vec![completed, failed]
    );
}

#[test]
fn detection_replaces_superseded_rows_in_one_go() {
    let store = store();
    let waiting = declaration(1, "087970000001", DeclarationStatus::WaitingApproval);
    let completed = declaration(2, "087970000001", DeclarationStatus::Completed);
    store.save_all(&[waiting.clone(), completed.clone()]).expect("seeded");
    let mut replacement = declaration(3, "087970000001", DeclarationStatus::WaitingApproval);
    replacement.total_weight = 5_000;

    store
        .apply_detection(&[DetectionWrite {
            superseded: vec![waiting.id.clone()],
            declaration: replacement.clone(),
        }])
        .expect("applied");

    let rows = store
        .find_by_key(&number("087970000001"), period(11, 2025))
        .expect("lookup");
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&completed));
    assert!(rows.contains(&replacement));
    assert_eq!(DeclarationStore::find(&store, &waiting.id).expect("lookup"), None);
}

#[test]
fn completed_declarations_are_detected_per_stream() {
    let store = store();
    store
        .save_all(&[
            declaration(1, "087970000001", DeclarationStatus::Completed),
            declaration(2, "087970000002", DeclarationStatus::Failed),
        ])
        .expect("seeded");

    assert!(store.has_completed(&number("087970000001")).expect("lookup"));
    assert!(!store.has_completed(&number("087970000002")).expect("lookup"));
    assert!(!store.has_completed(&number("087970000003")).expect("lookup"));
}

#[test]
fn corrupt_status_is_reported() {
    let store = store();
    store
        .save_all(&[declaration(1, "087970000001", DeclarationStatus::Pending)])
        .expect("seeded");
    store
        .conn()
        .execute("UPDATE lma_declarations SET status = 'SENT'", [])
        .expect("row updated");

    let result = DeclarationStore::find(&store, &DeclarationId::from_sequence(1));

    assert!(matches!(result, Err(StoreError::Corrupt(_))), "{result:?}");
}

#[test]
fn session_is_saved_together_with_its_declarations() {
    let store = store();
    let first = declaration(1, "087970000001", DeclarationStatus::Pending);
    let second = declaration(2, "087970000002", DeclarationStatus::Pending);
    let session = LmaDeclarationSession::pending(
        Uuid::new_v4(),
        vec![first.id.clone(), second.id.clone()],
        DeclarationType::FirstReceival,
        at(2025, 12, 1),
    );

    store
        .save_with_declarations(&session, &[first.clone(), second.clone()])
        .expect("saved");

    assert_eq!(
        store.find_many(&session.declaration_ids).expect("lookup"),
        vec![first, second]
    );
    assert_eq!(SessionStore::pending(&store).expect("pending"), vec![session.clone()]);

    let mut failed = session.clone();
    failed.fail("registry unreachable");
    SessionStore::save(&store, &failed).expect("saved");

    assert!(SessionStore::pending(&store).expect("pending").is_empty());
    let stored = SessionStore::find(&store, session.id)
        .expect("lookup")
        .expect("stored");
    assert_eq!(stored.status, SessionStatus::Failed);
    assert_eq!(stored.errors, vec!["registry unreachable"]);
}

#[test]
fn jobs_are_unique_and_drain_oldest_first() {
    let store = store();
    let later =
        WasteDeclarationJob::pending(JobType::MonthlyReceivals, period(11, 2025), at(2025, 12, 2));
    let earlier =
        WasteDeclarationJob::pending(JobType::FirstReceivals, period(11, 2025), at(2025, 12, 1));

    store.insert(&later).expect("inserted");
    store.insert(&earlier).expect("inserted");
    let duplicate = store.insert(&earlier);

    assert!(matches!(duplicate, Err(StoreError::Conflict(_))), "{duplicate:?}");
    assert_eq!(JobStore::pending(&store).expect("pending"), vec![earlier, later]);
}

#[test]
fn job_existence_can_be_narrowed_by_status() {
    let store = store();
    let mut job = WasteDeclarationJob::pending(
        JobType::LateWeightTickets,
        period(11, 2025),
        at(2025, 12, 4),
    );
    store.insert(&job).expect("inserted");

    job.status = JobStatus::Completed;
    job.fulfilled = Some(at(2025, 12, 4));
    JobStore::save(&store, &job).expect("saved");

    let late = JobType::LateWeightTickets;
    assert!(store.exists(late, period(11, 2025), None).expect("lookup"));
    assert!(store.exists(late, period(11, 2025), Some(JobStatus::Completed)).expect("lookup"));
    assert!(!store.exists(late, period(11, 2025), Some(JobStatus::Pending)).expect("lookup"));
    assert!(!store.exists(late, period(10, 2025), None).expect("lookup"));
    assert!(JobStore::pending(&store).expect("pending").is_empty());
}

#[test]
fn saving_an_unknown_job_conflicts() {
    let store = store();
    let job =
        WasteDeclarationJob::pending(JobType::FirstReceivals, period(11, 2025), at(2025, 12, 1));

    let result = JobStore::save(&store, &job);

    assert!(matches!(result, Err(StoreError::Conflict(_))), "{result:?}");
}

#[test]
fn lines_are_selected_by_period_boundaries() {
    let store = store();
    add_line(&store, "087970000001", 1_000, (2025, 10, 31));
    add_line(&store, "087970000001", 2_000, (2025, 11, 1));
    add_line(&store, "087970000001", 3_000, (2025, 11, 30));
    add_line(&store, "087970000001", 4_000, (2025, 12, 1));

    let weights = |lines: Vec<WeightTicketLine>| {
        lines.iter().map(|line| line.weight_kg).collect::<Vec<_>>()
    };

    assert_eq!(
        weights(store.lines_in_period(period(11, 2025)).expect("lines")),
        vec![2_000, 3_000]
    );
    assert_eq!(
        weights(store.lines_weighed_until(period(11, 2025)).expect("lines")),
        vec![1_000, 2_000, 3_000]
    );
}

#[test]
fn waste_streams_are_looked_up_by_number() {
    let store = store();
    store
        .conn()
        .execute(
            "INSERT INTO waste_streams (number, name, eural_code, processing_method_code, \
             consignor_party, processor_party, pickup_location) \
             VALUES ('087970000001', 'Bouw- en sloopafval', '170904', 'R12', '12345678', \
             'proc-1', NULL)",
            [],
        )
        .expect("stream inserted");

    let found = WasteStreams::find(&store, &number("087970000001"))
        .expect("lookup")
        .expect("registered");

    assert_eq!(found.eural_code, "170904");
    assert_eq!(found.pickup_location, None);
    assert_eq!(WasteStreams::find(&store, &number("087970000002")).expect("lookup"), None);
}
