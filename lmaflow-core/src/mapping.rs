//! Mapping of declarations onto the registry's submission messages.

use serde::{Deserialize, Serialize};

use crate::model::{LmaDeclaration, WasteStream};
use crate::period::Period;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// A declaration lacks data the registry requires.
pub enum MappingError {
    /// The waste stream has no EURAL code.
    #[error("waste stream {0} has no EURAL code")]
    MissingEuralCode(String),
    /// The waste stream has no processor party.
    #[error("waste stream {0} has no processor")]
    MissingProcessor(String),
    /// The declaration names no transporter.
    #[error("declaration {0} has no transporters")]
    MissingTransporters(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Payload of a first receival declaration (eerste ontvangstmelding).
pub struct FirstReceivalMessage {
    /// Declarer reference; the declaration id.
    pub reference: String,
    /// Declared waste stream.
    pub waste_stream_number: String,
    /// Reported month, 1..=12.
    pub period_month: u32,
    /// Reported year.
    pub period_year: i32,
    /// Usual name of the waste.
    pub waste_name: String,
    /// EURAL classification code.
    pub eural_code: String,
    /// Processing method code.
    pub processing_method_code: String,
    /// Party disposing of the waste.
    pub consignor_party: String,
    /// Party processing the waste.
    pub processor_party: String,
    /// Pickup location, absent for route collections.
    pub pickup_location: Option<String>,
    /// Carriers involved.
    pub transporters: Vec<String>,
    /// Total weight in kilograms.
    pub total_weight: i64,
    /// Number of shipments.
    pub total_shipments: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Payload of a monthly receival declaration (maandelijkse ontvangstmelding).
pub struct MonthlyReceivalMessage {
    /// Declarer reference; the declaration id.
    pub reference: String,
    /// Declared waste stream.
    pub waste_stream_number: String,
    /// Reported period, passed on as stored (`MMyyyy`).
    pub period: String,
    /// Carriers involved.
    pub transporters: Vec<String>,
    /// Total weight in kilograms.
    pub total_weight: i64,
    /// Number of shipments.
    pub total_shipments: u32,
}

/// Build the first receival message for a declaration.
///
/// # Errors
///
/// Returns a [`MappingError`] when the waste stream or declaration lacks
/// mandatory data.
pub fn first_receival(
    declaration: &LmaDeclaration,
    waste_stream: &WasteStream,
    period: Period,
) -> Result<FirstReceivalMessage, MappingError> {
    if waste_stream.eural_code.trim().is_empty() {
        return Err(MappingError::MissingEuralCode(waste_stream.number.0.clone()));
    }
    if waste_stream.processor_party.trim().is_empty() {
        return Err(MappingError::MissingProcessor(waste_stream.number.0.clone()));
    }
    if declaration.transporters.is_empty() {
        return Err(MappingError::MissingTransporters(declaration.id.0.clone()));
    }

    Ok(FirstReceivalMessage {
        reference: declaration.id.0.clone(),
        waste_stream_number: declaration.waste_stream_number.0.clone(),
        period_month: period.month(),
        period_year: period.year(),
        waste_name: waste_stream.name.clone(),
        eural_code: waste_stream.eural_code.clone(),
        processing_method_code: waste_stream.processing_method_code.clone(),
        consignor_party: waste_stream.consignor_party.clone(),
        processor_party: waste_stream.processor_party.clone(),
        pickup_location: waste_stream.pickup_location.clone(),
        transporters: declaration.transporters.clone(),
        total_weight: declaration.total_weight,
        total_shipments: declaration.total_shipments,
    })
}

/// Build the monthly receival message for a declaration.
#[must_use]
pub fn monthly_receival(declaration: &LmaDeclaration) -> MonthlyReceivalMessage {
    MonthlyReceivalMessage {
        reference: declaration.id.0.clone(),
        waste_stream_number: declaration.waste_stream_number.0.clone(),
        period: declaration.period.clone(),
        transporters: declaration.transporters.clone(),
        total_weight: declaration.total_weight,
        total_shipments: declaration.total_shipments,
    }
}
