//! Registry adapter for the LMA, reached through an AMICE gateway over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use lmaflow_core::{
    mapping::{FirstReceivalMessage, MonthlyReceivalMessage},
    ports::{
        AmiceRegistry, ItemResult, PortError, RegistryMessage, ResultCollection,
        RetrievalResponse, StatusDetails,
    },
};

/// Error code the gateway uses while a session is still being processed.
pub const NOT_ALL_PROCESSED: &str = "NOT_ALL_PROCESSED";

/// Body of a submission request.
#[derive(Debug, Serialize)]
struct SubmissionRequest<T> {
    meldingen: Vec<T>,
}

/// Response to a submission: the opened session.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionCreated {
    session_id: Uuid,
}

/// Response from GET /sessions/{id}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResult {
    #[serde(default)]
    status_details: Option<StatusDetailsEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusDetailsEntry {
    #[serde(default)]
    errors: Vec<MessageEntry>,

    // only one of these is populated per session, matching the submitted type
    #[serde(default)]
    first_receivals: Option<Vec<ItemEntry>>,
    #[serde(default)]
    monthly_receivals: Option<Vec<ItemEntry>>,
    #[serde(default)]
    discharges: Option<Vec<ItemEntry>>,
}

#[derive(Debug, Deserialize)]
struct MessageEntry {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemEntry {
    declarer_reference: String,
    #[serde(default)]
    amice_uuid: Option<Uuid>,
    #[serde(default)]
    technically_accepted: bool,
    #[serde(default)]
    errors: Vec<MessageEntry>,
}

impl From<MessageEntry> for RegistryMessage {
    fn from(entry: MessageEntry) -> Self {
        Self::new(entry.code, entry.description)
    }
}

impl From<ItemEntry> for ItemResult {
    fn from(entry: ItemEntry) -> Self {
        Self {
            declarer_reference: entry.declarer_reference,
            amice_uuid: entry.amice_uuid,
            technically_accepted: entry.technically_accepted,
            errors: entry.errors.into_iter().map(RegistryMessage::from).collect(),
        }
    }
}

fn items(entries: Vec<ItemEntry>) -> Vec<ItemResult> {
    entries.into_iter().map(ItemResult::from).collect()
}

impl From<StatusDetailsEntry> for StatusDetails {
    fn from(entry: StatusDetailsEntry) -> Self {
        let (pending, errors): (Vec<MessageEntry>, Vec<MessageEntry>) = entry
            .errors
            .into_iter()
            .partition(|message| message.code == NOT_ALL_PROCESSED);

        let mut collections = Vec::new();
        if let Some(entries) = entry.first_receivals {
            collections.push(ResultCollection::FirstReceivals(items(entries)));
        }
        if let Some(entries) = entry.monthly_receivals {
            collections.push(ResultCollection::MonthlyReceivals(items(entries)));
        }
        if let Some(entries) = entry.discharges {
            collections.push(ResultCollection::Discharges(items(entries)));
        }

        Self {
            not_all_processed: !pending.is_empty(),
            errors: errors.into_iter().map(RegistryMessage::from).collect(),
            collections,
        }
    }
}

impl From<SessionResult> for RetrievalResponse {
    fn from(result: SessionResult) -> Self {
        Self {
            details: result.status_details.map(StatusDetails::from),
        }
    }
}

/// [`AmiceRegistry`] implementation talking JSON to an AMICE gateway.
pub struct AmiceClient {
    client: Client,
    base_url: String,
}

impl AmiceClient {
    /// Create a client for the gateway at `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Network`] when the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PortError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing an existing HTTP client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    /// Base URL requests are sent to, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn submit<T: Serialize + Send>(
        &self,
        path: &str,
        meldingen: Vec<T>,
    ) -> Result<Uuid, PortError> {
        let count = meldingen.len();
        let req = self
            .client
            .post(format!("{}/sessions/{path}", self.base_url))
            .json(&SubmissionRequest { meldingen });

        let created = fetch_json::<SessionCreated>(req).await?;
        debug!(session_id = %created.session_id, path, count, "session opened");
        Ok(created.session_id)
    }
}

#[async_trait]
impl AmiceRegistry for AmiceClient {
    async fn declare_first_receivals(
        &self,
        items: Vec<FirstReceivalMessage>,
    ) -> Result<Uuid, PortError> {
        self.submit("first-receivals", items).await
    }

    async fn declare_monthly_receivals(
        &self,
        items: Vec<MonthlyReceivalMessage>,
    ) -> Result<Uuid, PortError> {
        self.submit("monthly-receivals", items).await
    }

    async fn retrieve(&self, session_id: Uuid) -> Result<RetrievalResponse, PortError> {
        let req = self
            .client
            .get(format!("{}/sessions/{session_id}", self.base_url));

        let result = fetch_json::<SessionResult>(req).await?;
        Ok(RetrievalResponse::from(result))
    }
}

async fn fetch_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, PortError> {
    req.send()
        .await
        .map_err(PortError::from)?
        .error_for_status()
        .map_err(PortError::from)?
        .json()
        .await
        .map_err(PortError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> RetrievalResponse {
        let result: SessionResult = serde_json::from_str(json).expect("valid gateway json");
        RetrievalResponse::from(result)
    }

    #[test]
    fn not_all_processed_code_becomes_marker() {
        let retrieved = response(
            r#"{"statusDetails":{"errors":[
                {"code":"NOT_ALL_PROCESSED","description":"Nog niet alle meldingen verwerkt"}
            ]}}"#,
        );

        let details = retrieved.details.expect("details present");
        assert!(details.not_all_processed);
        assert!(details.errors.is_empty());
        assert!(details.collections.is_empty());
    }

    #[test]
    fn request_errors_are_kept_in_order() {
        let retrieved = response(
            r#"{"statusDetails":{"errors":[
                {"code":"AUTH","description":"certificaat verlopen"},
                {"code":"SYS"}
            ]}}"#,
        );

        let details = retrieved.details.expect("details present");
        assert!(!details.not_all_processed);
        assert_eq!(
            details.errors,
            vec![
                RegistryMessage::new("AUTH", "certificaat verlopen"),
                RegistryMessage::new("SYS", ""),
            ]
        );
    }

    #[test]
    fn populated_collections_map_to_tagged_results() {
        let retrieved = response(
            r#"{"statusDetails":{"firstReceivals":[
                {
                    "declarerReference":"000000000001",
                    "amiceUuid":"0b0f8f0e-3f7c-4a55-9c1e-6f5f1d1b2a3c",
                    "technicallyAccepted":true
                },
                {
                    "declarerReference":"000000000002",
                    "technicallyAccepted":false,
                    "errors":[{"code":"EURAL_INVALID","description":"Euralcode onbekend"}]
                }
            ]}}"#,
        );

        let details = retrieved.details.expect("details present");
        let [ResultCollection::FirstReceivals(items)] = details.collections.as_slice() else {
            panic!("expected one first receival collection, got {:?}", details.collections);
        };
        let [first, second] = items.as_slice() else {
            panic!("expected two items, got {items:?}");
        };
        assert!(first.is_accepted());
        assert_eq!(
            first.amice_uuid,
            Some(Uuid::parse_str("0b0f8f0e-3f7c-4a55-9c1e-6f5f1d1b2a3c").expect("uuid"))
        );
        assert!(!second.is_accepted());
        assert_eq!(second.declarer_reference, "000000000002");
        assert_eq!(
            second.errors,
            vec![RegistryMessage::new("EURAL_INVALID", "Euralcode onbekend")]
        );
    }

    #[test]
    fn empty_collection_is_distinct_from_absent_one() {
        let retrieved = response(r#"{"statusDetails":{"monthlyReceivals":[]}}"#);

        let details = retrieved.details.expect("details present");
        assert_eq!(details.collections, vec![ResultCollection::MonthlyReceivals(Vec::new())]);
    }

    #[test]
    fn missing_status_block_yields_no_details() {
        assert_eq!(response("{}"), RetrievalResponse { details: None });
        assert_eq!(
            response(r#"{"statusDetails":null}"#),
            RetrievalResponse { details: None }
        );
    }

    #[test]
    fn submission_body_wraps_messages() {
        let body = serde_json::to_value(SubmissionRequest {
            meldingen: vec![MonthlyReceivalMessage {
                reference: "000000000007".to_owned(),
                waste_stream_number: "087970000001".to_owned(),
                period: "112025".to_owned(),
                transporters: vec!["transport-1".to_owned()],
                total_weight: 1_500,
                total_shipments: 2,
            }],
        })
        .expect("serializable");

        assert_eq!(body["meldingen"][0]["wasteStreamNumber"], "087970000001");
        assert_eq!(body["meldingen"][0]["totalWeight"], 1_500);
    }

    #[test]
    fn trailing_slash_is_dropped_from_base_url() {
        let client = AmiceClient::with_client(Client::new(), "https://gateway.example/amice/");
        assert_eq!(client.base_url(), "https://gateway.example/amice");
    }
}
