//! JSON-lines protocol: one request object per line, one response per line.
//!
//! ```text
//! → {"id":1,"property":"seaview","op":"check_availability","query":{...}}
//! ← {"id":1,"ok":true,"result":{...}}
//! ← {"id":2,"ok":false,"error":{"kind":"conflict","message":"..."}}
//! ```
//!
//! Responses are written in request order on each connection.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{AvailabilityQuery, BookingRequest, EngineError, QuoteRequest};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{REQUEST_DURATION_SECONDS, REQUESTS_TOTAL, command_label};
use crate::property::PropertyManager;
use crate::repository::{RepositoryError, ResourceRepository, RuleRepository};
use crate::service::{BookingService, ServiceError};

#[derive(Debug, Deserialize)]
pub struct Request {
    /// Echoed back verbatim so clients can pipeline.
    #[serde(default)]
    pub id: Option<Value>,
    pub property: String,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CheckAvailability {
        query: AvailabilityQuery,
    },
    QuotePrice {
        request: QuoteRequest,
    },
    CheckAvailabilityAndQuote {
        request: BookingRequest,
    },
    Book {
        request: BookingRequest,
        #[serde(default = "default_status")]
        status: ReservationStatus,
        #[serde(default)]
        label: Option<String>,
    },
    Reschedule {
        id: ReservationId,
        period: Period,
        #[serde(default)]
        guests: Option<u32>,
        #[serde(default)]
        rooms: Option<u32>,
    },
    SetStatus {
        id: ReservationId,
        status: ReservationStatus,
    },
    ListReservations {
        inventory: InventoryKey,
    },
    UpsertResource {
        resource: BookableResource,
    },
    ListResources,
    AddMaintenance {
        window: MaintenanceInput,
    },
    RemoveMaintenance {
        id: WindowId,
    },
    UpsertRule {
        rule: RuleInput,
    },
    RemoveRule {
        id: RuleId,
    },
}

fn default_status() -> ReservationStatus {
    ReservationStatus::Confirmed
}

/// A maintenance window as submitted; the server assigns the id if omitted.
#[derive(Debug, Deserialize)]
pub struct MaintenanceInput {
    #[serde(default)]
    pub id: Option<WindowId>,
    pub resource: InventoryKey,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A pricing rule as submitted. `created_at` drives the recency tie-break,
/// so it defaults to the time the server accepts the rule.
#[derive(Debug, Deserialize)]
pub struct RuleInput {
    #[serde(default)]
    pub id: Option<RuleId>,
    #[serde(default)]
    pub name: Option<String>,
    pub scope: RuleScope,
    pub rule_type: RuleType,
    pub adjustment_type: AdjustmentType,
    #[serde(default)]
    pub values: std::collections::BTreeMap<PlanCode, f64>,
    #[serde(default)]
    pub default_value: Option<f64>,
    #[serde(default)]
    pub condition: RuleCondition,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl RuleInput {
    fn into_rule(self, now: DateTime<Utc>) -> PricingRule {
        PricingRule {
            id: self.id.unwrap_or_else(Ulid::new),
            name: self.name,
            scope: self.scope,
            rule_type: self.rule_type,
            adjustment_type: self.adjustment_type,
            values: self.values,
            default_value: self.default_value,
            condition: self.condition,
            priority: self.priority,
            stackable: self.stackable,
            is_active: self.is_active,
            created_at: self.created_at.unwrap_or(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    /// Structured context, e.g. the availability verdict behind `unavailable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<Value>, error: ErrorBody) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

fn error_body(kind: &str, message: impl Into<String>) -> ErrorBody {
    ErrorBody {
        kind: kind.to_string(),
        message: message.into(),
        detail: None,
    }
}

impl From<ServiceError> for ErrorBody {
    fn from(err: ServiceError) -> Self {
        let mut body = error_body(err.kind(), err.to_string());
        if let ServiceError::Unavailable(result) = &err {
            body.detail = serde_json::to_value(result.as_ref()).ok();
        }
        body
    }
}

impl From<RepositoryError> for ErrorBody {
    fn from(err: RepositoryError) -> Self {
        ServiceError::from(err).into()
    }
}

/// A request that parses but carries a value the engine rejects keeps the
/// engine's error kind; anything else is a malformed request.
fn decode_error(err: &serde_json::Error) -> ErrorBody {
    let message = err.to_string();
    let unknown_plan = EngineError::UnknownPlanCode(String::new());
    if err.classify() == serde_json::error::Category::Data
        && message.contains(unknown_plan.to_string().trim_end())
    {
        return error_body(unknown_plan.kind(), message);
    }
    error_body("bad_request", message)
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ErrorBody> {
    serde_json::to_value(value).map_err(|e| error_body("internal", e.to_string()))
}

/// Parse and execute one request line. Never fails; faults become error responses.
pub async fn handle_line(properties: &PropertyManager, line: &str) -> Response {
    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Response::failure(None, error_body("bad_request", format!("malformed JSON: {e}"))),
    };
    let id = raw.get("id").cloned();
    let request: Request = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => return Response::failure(id, decode_error(&e)),
    };

    let op = command_label(&request.command);
    let started = Instant::now();
    let outcome = execute(properties, &request.property, request.command).await;
    let status = if outcome.is_ok() { "ok" } else { "error" };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => Response::success(request.id, result),
        Err(error) => {
            debug!(op, property = %request.property, kind = %error.kind, "request failed");
            Response::failure(request.id, error)
        }
    }
}

async fn execute(properties: &PropertyManager, property: &str, cmd: Command) -> Result<Value, ErrorBody> {
    let store = properties.get_or_open(property).map_err(|e| {
        let kind = if e.kind() == std::io::ErrorKind::InvalidInput {
            "invalid_property"
        } else {
            "repository_unavailable"
        };
        error_body(kind, format!("property {property}: {e}"))
    })?;
    let decimals = store.policy().currency_decimals;
    let service = BookingService::for_store(store.clone());

    match cmd {
        Command::CheckAvailability { query } => to_json(&service.check_availability(&query).await?),
        Command::QuotePrice { request } => to_json(&service.quote_price(&request).await?.rounded(decimals)),
        Command::CheckAvailabilityAndQuote { request } => {
            let mut verdict = service.check_availability_and_quote(&request).await?;
            verdict.quote = verdict.quote.map(|q| q.rounded(decimals));
            to_json(&verdict)
        }
        Command::Book { request, status, label } => {
            to_json(&service.book(request, status, label).await?.rounded(decimals))
        }
        Command::Reschedule {
            id,
            period,
            guests,
            rooms,
        } => to_json(&service.reschedule(id, period, guests, rooms).await?.rounded(decimals)),
        Command::SetStatus { id, status } => to_json(&service.set_status(id, status).await?),
        Command::ListReservations { inventory } => to_json(&service.list_reservations(&inventory).await?),
        Command::UpsertResource { resource } => {
            let key = resource.key.clone();
            store.upsert_resource(resource).await?;
            to_json(&serde_json::json!({ "resource": key }))
        }
        Command::ListResources => to_json(&store.list_resources().await),
        Command::AddMaintenance { window } => {
            let window = MaintenanceWindow {
                id: window.id.unwrap_or_else(Ulid::new),
                resource: window.resource,
                start_date: window.start_date,
                end_date: window.end_date,
                active: true,
                reason: window.reason,
            };
            let id = window.id;
            store.add_maintenance(window).await?;
            to_json(&serde_json::json!({ "id": id }))
        }
        Command::RemoveMaintenance { id } => {
            store.remove_maintenance(id).await?;
            to_json(&serde_json::json!({ "id": id }))
        }
        Command::UpsertRule { rule } => {
            let rule = rule.into_rule(Utc::now());
            let id = rule.id;
            store.upsert_rule(rule).await?;
            to_json(&serde_json::json!({ "id": id }))
        }
        Command::RemoveRule { id } => {
            store.remove_rule(id).await?;
            to_json(&serde_json::json!({ "id": id }))
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, properties: Arc<PropertyManager>) -> std::io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&properties, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line over {MAX_LINE_LEN} bytes discarded");
                Response::failure(None, error_body("limit_exceeded", "request line too long"))
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        let encoded = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        framed.send(encoded).await.map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => std::io::Error::other(other),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Policy;
    use serde_json::json;

    fn manager(name: &str) -> PropertyManager {
        let dir = std::env::temp_dir().join("innkeep_test_wire").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        PropertyManager::new(dir, 1000, Policy::default())
    }

    async fn call(pm: &PropertyManager, request: Value) -> Response {
        handle_line(pm, &request.to_string()).await
    }

    fn venue_key() -> Value {
        json!({"venue": {"property_id": "seaview", "venue_id": "ballroom"}})
    }

    fn event(start: &str, end: &str) -> Value {
        json!({"event": {"date": "2025-06-14", "slot": {"start": start, "end": end}}})
    }

    async fn seed_ballroom(pm: &PropertyManager) {
        let resp = call(
            pm,
            json!({
                "property": "seaview",
                "op": "upsert_resource",
                "resource": {"key": venue_key(), "base_price": 50000, "capacity": {"seated": 150}},
            }),
        )
        .await;
        assert!(resp.ok, "{resp:?}");
    }

    #[tokio::test]
    async fn malformed_lines_are_bad_requests() {
        let pm = manager("malformed");
        let resp = handle_line(&pm, "{not json").await;
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().kind, "bad_request");

        let resp = call(&pm, json!({"id": 7, "property": "seaview", "op": "teleport"})).await;
        assert_eq!(resp.id, Some(json!(7)));
        assert_eq!(resp.error.unwrap().kind, "bad_request");
    }

    #[tokio::test]
    async fn unknown_plan_code_is_invalid_input() {
        let pm = manager("unknown_plan");
        let resp = call(
            &pm,
            json!({
                "id": 3,
                "property": "seaview",
                "op": "quote_price",
                "request": {
                    "resource": {"room": {"property_id": "seaview", "category": "deluxe", "plan": "BB", "occupancy": "double"}},
                    "period": {"stay": {"from": "2025-06-14", "to": "2025-06-15"}},
                    "guests": 2,
                },
            }),
        )
        .await;
        assert_eq!(resp.id, Some(json!(3)));
        let error = resp.error.unwrap();
        assert_eq!(error.kind, "invalid_input");
        assert!(error.message.contains("BB"), "{}", error.message);
    }

    #[tokio::test]
    async fn invalid_property_id() {
        let pm = manager("invalid_property");
        let resp = call(&pm, json!({"property": "../etc", "op": "list_resources"})).await;
        assert_eq!(resp.error.unwrap().kind, "invalid_property");
    }

    #[tokio::test]
    async fn book_then_unavailable_with_detail() {
        let pm = manager("book");
        seed_ballroom(&pm).await;

        let booked = call(
            &pm,
            json!({
                "id": "a",
                "property": "seaview",
                "op": "book",
                "request": {"resource": venue_key(), "period": event("10:00:00", "14:00:00"), "guests": 120},
            }),
        )
        .await;
        assert!(booked.ok, "{booked:?}");
        let result = booked.result.unwrap();
        assert_eq!(result["reservation"]["status"], "confirmed");
        // 50000 plus 12% tax and 5% service fee, both on the base.
        assert_eq!(result["quote"]["breakdown"]["total"], json!(58500.0));

        let refused = call(
            &pm,
            json!({
                "property": "seaview",
                "op": "book",
                "request": {"resource": venue_key(), "period": event("13:00:00", "15:00:00"), "guests": 200},
            }),
        )
        .await;
        let error = refused.error.unwrap();
        assert_eq!(error.kind, "unavailable");
        let reasons = error.detail.unwrap()["reasons_unavailable"].as_array().unwrap().len();
        assert_eq!(reasons, 2);
    }

    #[tokio::test]
    async fn combined_check_reports_both_halves() {
        let pm = manager("combined");
        seed_ballroom(&pm).await;
        let resp = call(
            &pm,
            json!({
                "property": "seaview",
                "op": "check_availability_and_quote",
                "request": {"resource": venue_key(), "period": event("18:00:00", "22:00:00"), "guests": 80},
            }),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["availability"]["is_available"], json!(true));
        assert!(result["quote"].is_object());
        assert!(result["pricing_error"].is_null());
    }

    #[tokio::test]
    async fn rules_and_maintenance_round_trip() {
        let pm = manager("ops");
        seed_ballroom(&pm).await;

        let rule = call(
            &pm,
            json!({
                "property": "seaview",
                "op": "upsert_rule",
                "rule": {
                    "scope": {"property": {"property_id": "seaview"}},
                    "rule_type": "seasonal",
                    "adjustment_type": "percentage",
                    "default_value": 20,
                },
            }),
        )
        .await;
        assert!(rule.ok, "{rule:?}");

        let quote = call(
            &pm,
            json!({
                "property": "seaview",
                "op": "quote_price",
                "request": {"resource": venue_key(), "period": event("10:00:00", "12:00:00"), "guests": 50},
            }),
        )
        .await;
        assert_eq!(quote.result.unwrap()["breakdown"]["subtotal_after_dynamic"], json!(60000.0));

        let window = call(
            &pm,
            json!({
                "property": "seaview",
                "op": "add_maintenance",
                "window": {
                    "resource": {"venue": {"property_id": "seaview", "venue_id": "ballroom"}},
                    "start_date": "2025-06-14",
                    "end_date": "2025-06-14",
                },
            }),
        )
        .await;
        let window_id = window.result.unwrap()["id"].clone();

        let check = call(
            &pm,
            json!({
                "property": "seaview",
                "op": "check_availability",
                "query": {"resource": venue_key(), "period": event("10:00:00", "12:00:00")},
            }),
        )
        .await;
        assert_eq!(check.result.unwrap()["is_available"], json!(false));

        let removed = call(
            &pm,
            json!({"property": "seaview", "op": "remove_maintenance", "id": window_id}),
        )
        .await;
        assert!(removed.ok);
        let gone = call(
            &pm,
            json!({"property": "seaview", "op": "remove_maintenance", "id": window_id}),
        )
        .await;
        assert_eq!(gone.error.unwrap().kind, "not_found");
    }
}
