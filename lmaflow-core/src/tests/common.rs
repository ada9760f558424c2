use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use crate::approval::DeclarationApprovalService;
use crate::declarator::{FirstReceivalDeclarator, ReceivalDeclarator};
use crate::detector::DeclarationDetector;
use crate::memory::{MemoryRegistry, MemoryStore};
use crate::model::{
    DeclarationId, DeclarationStatus, DeclarationType, LmaDeclaration, LmaDeclarationSession,
    WasteStream, WasteStreamNumber, WeightTicketLine,
};
use crate::period::Period;
use crate::ports::{ItemResult, RegistryMessage, ResultCollection, RetrievalResponse, StatusDetails};
use crate::resolver::SessionResultResolver;
use crate::scheduler::JobScheduler;

pub(super) const TIMEOUT: Duration = Duration::from_secs(5);

pub(super) fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn period(month: u32, year: i32) -> Period {
    Period::new(month, year).expect("valid period")
}

pub(super) fn number(raw: &str) -> WasteStreamNumber {
    WasteStreamNumber(raw.to_owned())
}

pub(super) fn line(
    stream: &str,
    weight_kg: i64,
    carrier: &str,
    day: (i32, u32, u32),
) -> WeightTicketLine {
    WeightTicketLine {
        waste_stream_number: number(stream),
        weight_kg,
        carrier: carrier.to_owned(),
        weighed_at: NaiveDate::from_ymd_opt(day.0, day.1, day.2)
            .and_then(|date| date.and_hms_opt(10, 15, 0))
            .expect("valid weighing time"),
    }
}

pub(super) fn waste_stream(raw: &str, processor: &str) -> WasteStream {
    WasteStream {
        number: number(raw),
        name: "Houtafval".to_owned(),
        eural_code: "170201".to_owned(),
        processing_method_code: "R05".to_owned(),
        consignor_party: "12345678".to_owned(),
        processor_party: processor.to_owned(),
        pickup_location: Some("Industrieweg 4, Zwolle".to_owned()),
    }
}

pub(super) fn seeded_id(sequence: u64) -> DeclarationId {
    DeclarationId::from_sequence(900_000 + sequence)
}

pub(super) fn declaration(
    sequence: u64,
    stream: &str,
    period: &str,
    status: DeclarationStatus,
    declaration_type: DeclarationType,
) -> LmaDeclaration {
    LmaDeclaration {
        id: seeded_id(sequence),
        waste_stream_number: number(stream),
        period: period.to_owned(),
        transporters: vec!["transport-1".to_owned()],
        total_weight: 4_200,
        total_shipments: 3,
        declaration_type,
        status,
        amice_uuid: None,
        errors: Vec::new(),
        created_at: at(2025, 11, 1),
    }
}

pub(super) fn pending_session(declarations: &[&LmaDeclaration]) -> LmaDeclarationSession {
    LmaDeclarationSession::pending(
        Uuid::new_v4(),
        declarations.iter().map(|declaration| declaration.id.clone()).collect(),
        DeclarationType::FirstReceival,
        at(2025, 11, 2),
    )
}

pub(super) fn accepted(id: &DeclarationId, amice_uuid: Uuid) -> ItemResult {
    ItemResult {
        declarer_reference: id.0.clone(),
        amice_uuid: Some(amice_uuid),
        technically_accepted: true,
        errors: Vec::new(),
    }
}

pub(super) fn rejected(id: &DeclarationId, code: &str, description: &str) -> ItemResult {
    ItemResult {
        declarer_reference: id.0.clone(),
        amice_uuid: None,
        technically_accepted: false,
        errors: vec![RegistryMessage::new(code, description)],
    }
}

pub(super) fn processed(collections: Vec<ResultCollection>) -> RetrievalResponse {
    RetrievalResponse {
        details: Some(StatusDetails {
            not_all_processed: false,
            errors: Vec::new(),
            collections,
        }),
    }
}

pub(super) struct Harness {
    pub(super) store: Arc<MemoryStore>,
    pub(super) registry: Arc<MemoryRegistry>,
}

impl Harness {
    pub(super) fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            registry: Arc::new(MemoryRegistry::new()),
        }
    }

    pub(super) fn detector(&self) -> DeclarationDetector {
        DeclarationDetector::new(
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryStore>::clone(&self.store),
        )
    }

    pub(super) fn approval(&self, timeout: Duration) -> DeclarationApprovalService {
        DeclarationApprovalService::new(
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryRegistry>::clone(&self.registry),
            timeout,
        )
    }

    pub(super) fn resolver(&self, timeout: Duration) -> SessionResultResolver {
        SessionResultResolver::new(
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryRegistry>::clone(&self.registry),
            timeout,
        )
    }

    pub(super) fn declarator(&self) -> FirstReceivalDeclarator {
        FirstReceivalDeclarator::new(
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryRegistry>::clone(&self.registry),
            TIMEOUT,
        )
    }

    pub(super) fn scheduler(&self, declarator: Arc<dyn ReceivalDeclarator>) -> JobScheduler {
        JobScheduler::new(
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryStore>::clone(&self.store),
            Arc::<MemoryStore>::clone(&self.store),
            Arc::new(self.detector()),
            declarator,
        )
    }
}
