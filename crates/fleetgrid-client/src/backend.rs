//! REST boundary: row queries, record writes, owner search, session check, and
//! the vehicle preset endpoints under `/api/vehicle/special`.
//!
//! [`Backend`] is the seam the rest of the crate talks to. [`HttpBackend`] is
//! the production implementation over `reqwest`; tests swap in the in-memory
//! fake from [`crate::testing`].

use std::time::Duration;

use async_trait::async_trait;
use fleetgrid_types::{
    Collection, PersonSummary, QueryContract, QueryResponse, RecordId, Row, VehicleType,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::ConsoleConfig;
use crate::constants;
use crate::error::ClientError;

#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /api/<resource>/query`.
    async fn query_rows(
        &self,
        collection: Collection,
        contract: &QueryContract,
    ) -> Result<QueryResponse, ClientError>;

    /// `POST /api/<resource>`; returns the server's echo of the record.
    async fn create_record(&self, collection: Collection, body: &Value) -> Result<Value, ClientError>;

    /// `PUT /api/<resource>/<id>`.
    async fn update_record(
        &self,
        collection: Collection,
        id: RecordId,
        body: &Value,
    ) -> Result<Value, ClientError>;

    /// `DELETE /api/<resource>/<id>[?reassignTo=<id>]`.
    async fn delete_record(
        &self,
        collection: Collection,
        id: RecordId,
        reassign_to: Option<RecordId>,
    ) -> Result<(), ClientError>;

    /// `GET /api/person/search?q=&limit=`.
    async fn search_persons(&self, query: &str, limit: u32) -> Result<Vec<PersonSummary>, ClientError>;

    /// `GET /api/auth/check-session`. `Err(Unauthorized)` when no session is active.
    async fn check_session(&self) -> Result<(), ClientError>;

    /// `GET /api/vehicle/special/<selection>`; the server's list of matches.
    async fn select_vehicles(&self, selection: VehicleSelection) -> Result<Value, ClientError>;

    /// `GET /api/vehicle/special/count-fuel-gt?v=`.
    async fn count_fuel_consumption_above(&self, threshold: f64) -> Result<u64, ClientError>;

    /// `GET /api/vehicle/special/min-distance`. `None` when the server answers
    /// `204 No Content`: no vehicle has a recorded distance.
    async fn min_distance_vehicle(&self) -> Result<Option<Row>, ClientError>;
}

const SPECIAL_PATH: &str = "/api/vehicle/special";

/// Server-side vehicle selections behind the console's preset panel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VehicleSelection {
    FuelConsumptionAbove(f64),
    TypeEquals(VehicleType),
    EnginePowerBetween { min: f64, max: f64 },
}

impl VehicleSelection {
    /// Endpoint name under `/api/vehicle/special`.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::FuelConsumptionAbove(_) => "list-fuel-gt",
            Self::TypeEquals(_) => "by-type",
            Self::EnginePowerBetween { .. } => "by-engine-range",
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match *self {
            Self::FuelConsumptionAbove(v) => vec![("v", v.to_string())],
            Self::TypeEquals(t) => vec![("type", t.to_string())],
            Self::EnginePowerBetween { min, max } => vec![("min", min.to_string()), ("max", max.to_string())],
        }
    }
}

#[derive(Deserialize)]
struct CountBody {
    count: u64,
}

/// Error body shape shared by the conflict and validation responses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    error: Option<String>,
    ref_count: Option<u64>,
    details: Option<Value>,
}

/// Map a non-2xx response to the error taxonomy.
pub fn classify(status: u16, body: &[u8]) -> ClientError {
    let parsed: Option<ErrorBody> = serde_json::from_slice(body).ok();
    let text = String::from_utf8_lossy(body).trim().to_string();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone().or_else(|| b.error.clone()))
        .unwrap_or_else(|| if text.is_empty() { format!("HTTP {status}") } else { text.clone() });

    match status {
        401 => ClientError::Unauthorized,
        409 => match parsed {
            Some(ErrorBody { code: Some(code), ref_count, .. })
                if code == constants::FK_CONSTRAINT_CODE =>
            {
                ClientError::Conflict { code, message, ref_count: ref_count.unwrap_or(0) }
            }
            _ => ClientError::NetworkFailure { status: Some(status), message },
        },
        400 | 422 => ClientError::ValidationRejected {
            status,
            message,
            details: parsed.and_then(|b| b.details),
        },
        _ => ClientError::NetworkFailure { status: Some(status), message },
    }
}

/// `reqwest`-backed [`Backend`].
///
/// The cookie store is enabled so the session cookie set by the auth endpoints
/// travels with every call.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .user_agent(concat!("fleetgrid/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &ConsoleConfig) -> Result<Self, ClientError> {
        Self::new(&config.api_base, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send and classify; hand back the success status with its body bytes.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(u16, Vec<u8>), ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let err = classify(status.as_u16(), &body);
            debug!(status = status.as_u16(), error = %err, "request rejected");
            return Err(err);
        }
        Ok((status.as_u16(), body.to_vec()))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, ClientError> {
        Ok(self.send(request).await?.1)
    }

    fn special(&self, endpoint: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(&format!("{SPECIAL_PATH}/{endpoint}")))
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ClientError> {
    serde_json::from_slice(body).map_err(|e| ClientError::network(format!("undecodable response body: {e}")))
}

/// `204 No Content` means "nothing found"; any other success carries a body.
fn decode_optional<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<Option<T>, ClientError> {
    if status == 204 { Ok(None) } else { decode(body).map(Some) }
}

/// Write endpoints may answer with an empty body.
fn decode_or_null(body: &[u8]) -> Result<Value, ClientError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(Value::Null)
    } else {
        decode(body)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    #[instrument(skip(self, contract), fields(start = contract.start_row, end = contract.end_row))]
    async fn query_rows(
        &self,
        collection: Collection,
        contract: &QueryContract,
    ) -> Result<QueryResponse, ClientError> {
        let request = self.client.post(self.url(&collection.query_path())).json(contract);
        decode(&self.execute(request).await?)
    }

    async fn create_record(&self, collection: Collection, body: &Value) -> Result<Value, ClientError> {
        let request = self.client.post(self.url(&collection.collection_path())).json(body);
        decode_or_null(&self.execute(request).await?)
    }

    async fn update_record(
        &self,
        collection: Collection,
        id: RecordId,
        body: &Value,
    ) -> Result<Value, ClientError> {
        let request = self.client.put(self.url(&collection.record_path(id))).json(body);
        decode_or_null(&self.execute(request).await?)
    }

    #[instrument(skip(self))]
    async fn delete_record(
        &self,
        collection: Collection,
        id: RecordId,
        reassign_to: Option<RecordId>,
    ) -> Result<(), ClientError> {
        let mut request = self.client.delete(self.url(&collection.record_path(id)));
        if let Some(target) = reassign_to {
            request = request.query(&[("reassignTo", target.0)]);
        }
        self.execute(request).await?;
        Ok(())
    }

    async fn search_persons(&self, query: &str, limit: u32) -> Result<Vec<PersonSummary>, ClientError> {
        let request = self
            .client
            .get(self.url("/api/person/search"))
            .query(&[("q", query.to_string()), ("limit", limit.to_string())]);
        decode(&self.execute(request).await?)
    }

    async fn check_session(&self) -> Result<(), ClientError> {
        self.execute(self.client.get(self.url("/api/auth/check-session"))).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn select_vehicles(&self, selection: VehicleSelection) -> Result<Value, ClientError> {
        let request = self.special(selection.endpoint()).query(&selection.query_pairs());
        decode_or_null(&self.execute(request).await?)
    }

    async fn count_fuel_consumption_above(&self, threshold: f64) -> Result<u64, ClientError> {
        let request = self.special("count-fuel-gt").query(&[("v", threshold.to_string())]);
        let body: CountBody = decode(&self.execute(request).await?)?;
        Ok(body.count)
    }

    async fn min_distance_vehicle(&self) -> Result<Option<Row>, ClientError> {
        let (status, body) = self.send(self.special("min-distance")).await?;
        decode_optional(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unauthorized_is_distinct() {
        assert_eq!(classify(401, b""), ClientError::Unauthorized);
        assert_eq!(classify(401, br#"{"message":"expired"}"#), ClientError::Unauthorized);
    }

    #[test]
    fn fk_conflict_carries_ref_count() {
        let body = br#"{"message":"Person is referenced","code":"FK_CONSTRAINT","refCount":3}"#;
        assert_eq!(
            classify(409, body),
            ClientError::Conflict {
                code: "FK_CONSTRAINT".into(),
                message: "Person is referenced".into(),
                ref_count: 3,
            }
        );
    }

    #[test]
    fn other_conflicts_are_generic() {
        let err = classify(409, br#"{"message":"version mismatch","code":"STALE"}"#);
        assert_eq!(
            err,
            ClientError::NetworkFailure { status: Some(409), message: "version mismatch".into() }
        );
    }

    #[test]
    fn validation_body_is_kept_verbatim() {
        let body = br#"{"error":"validation","details":[{"path":"name","message":"must not be blank"}]}"#;
        match classify(400, body) {
            ClientError::ValidationRejected { status, message, details } => {
                assert_eq!(status, 400);
                assert_eq!(message, "validation");
                assert_eq!(details, Some(json!([{"path": "name", "message": "must not be blank"}])));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn plain_text_and_empty_bodies() {
        assert_eq!(
            classify(503, b"upstream down\n"),
            ClientError::NetworkFailure { status: Some(503), message: "upstream down".into() }
        );
        assert_eq!(
            classify(500, b""),
            ClientError::NetworkFailure { status: Some(500), message: "HTTP 500".into() }
        );
    }

    #[test]
    fn no_content_means_nothing_found() {
        assert_eq!(decode_optional::<Row>(204, b"").unwrap(), None);
        let row = decode_optional::<Row>(200, br#"{"id":4,"distanceTravelled":12}"#).unwrap().unwrap();
        assert_eq!(row.get_path("distanceTravelled"), Some(&json!(12)));
        assert!(matches!(
            decode_optional::<Row>(200, b""),
            Err(ClientError::NetworkFailure { status: None, .. })
        ));
    }

    #[test]
    fn selections_map_to_special_endpoints() {
        let fuel = VehicleSelection::FuelConsumptionAbove(10.0);
        assert_eq!(fuel.endpoint(), "list-fuel-gt");
        assert_eq!(fuel.query_pairs(), vec![("v", "10".to_string())]);

        let by_type = VehicleSelection::TypeEquals(VehicleType::Chopper);
        assert_eq!(by_type.endpoint(), "by-type");
        assert_eq!(by_type.query_pairs(), vec![("type", "CHOPPER".to_string())]);

        let range = VehicleSelection::EnginePowerBetween { min: 100.0, max: 250.5 };
        assert_eq!(range.endpoint(), "by-engine-range");
        assert_eq!(range.query_pairs(), vec![("min", "100".to_string()), ("max", "250.5".to_string())]);
    }

    #[test]
    fn base_url_is_normalized() {
        let backend = HttpBackend::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8080");
        assert_eq!(backend.url("/api/vehicle/query"), "http://localhost:8080/api/vehicle/query");
    }
}
