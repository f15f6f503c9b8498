//! HTTP surface: deal search, watches, trip planning, and conversational
//! chat. Thin handlers: all real work happens in the service components;
//! a handler's job is request parsing, the one matching service call, and
//! response shaping.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::aliases;
use crate::models::{Conversation, Deal, DealType, PriceWatch, UserPreference};
use crate::service::Service;
use crate::session_hub::WsServerEvent;

use super::ws::websocket_handler;

pub enum ApiError {
    NotFound,
    BadRequest(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub fn router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/deals", get(list_deals))
        .route("/deals/:deal_id", get(get_deal))
        .route("/deals/:deal_id/explain", get(explain_deal).post(explain_deal))
        .route("/watch/create", post(create_watch))
        .route("/watch/list", get(list_watches))
        .route("/watch/:watch_id", delete(delete_watch))
        .route("/trip/plan", post(plan_trip))
        .route("/policy", post(policy))
        .route("/preferences/:user_id", get(get_preferences).post(post_preferences))
        .route("/chat", post(chat))
        .route("/metrics", get(metrics))
        .route("/ws/events", get(websocket_handler))
        .with_state(service)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "OK" }))
}

#[derive(Debug, Deserialize)]
pub struct ListDealsQuery {
    #[serde(rename = "type")]
    pub deal_type: Option<String>,
    pub tag: Option<String>,
    pub min_score: Option<u32>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub limit: Option<usize>,
}

const DEFAULT_DEALS_LIMIT: usize = 50;

async fn list_deals(
    Query(query): Query<ListDealsQuery>,
    State(service): State<Arc<Service>>,
) -> Result<Json<Vec<Deal>>, ApiError> {
    let deal_type = match query.deal_type.as_deref() {
        Some("flight") => Some(DealType::Flight),
        Some("hotel") => Some(DealType::Hotel),
        Some(other) => return Err(ApiError::BadRequest(format!("unknown deal type `{other}`"))),
        None => None,
    };

    let mut deals = service.store.list_active_deals(deal_type).map_err(|err| {
        error!(error = %err, "list_active_deals failed");
        ApiError::Internal
    })?;

    if let Some(tag) = &query.tag {
        deals.retain(|d| d.tags.contains(tag));
    }
    if let Some(min_score) = query.min_score {
        deals.retain(|d| d.score >= min_score);
    }
    if let Some(origin) = &query.origin {
        // Origin is a departure filter; hotels have no departure.
        let origins = aliases::expand_airport_group(origin);
        deals.retain(|d| match &d.metadata {
            crate::models::DealMetadata::Flight { origin, .. } => origins.contains(origin),
            crate::models::DealMetadata::Hotel { .. } => false,
        });
    }
    if let Some(destination) = &query.destination {
        let destinations = aliases::expand_airport_group(destination);
        let cities: Vec<String> = destinations
            .iter()
            .filter_map(|code| aliases::airport_to_city(code).map(str::to_uppercase))
            .collect();
        deals.retain(|d| match &d.metadata {
            crate::models::DealMetadata::Flight { destination, .. } => destinations.contains(destination),
            crate::models::DealMetadata::Hotel { city, .. } => {
                let upper = city.to_uppercase();
                cities.iter().any(|c| upper.contains(c))
            }
        });
    }

    deals.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.deal_id.cmp(&b.deal_id)));
    deals.truncate(query.limit.unwrap_or(DEFAULT_DEALS_LIMIT));

    Ok(Json(deals))
}

async fn get_deal(
    Path(deal_id): Path<String>,
    State(service): State<Arc<Service>>,
) -> Result<Json<Deal>, ApiError> {
    let deal = service.store.get_deal(&deal_id).map_err(|err| {
        error!(error = %err, "get_deal failed");
        ApiError::Internal
    })?;
    deal.map(Json).ok_or(ApiError::NotFound)
}

#[derive(Debug, Deserialize)]
pub struct CreateWatchRequest {
    pub user_id: String,
    pub deal_id: String,
    pub price_threshold: Option<f64>,
    pub inventory_threshold: Option<i64>,
}

async fn create_watch(
    State(service): State<Arc<Service>>,
    Json(request): Json<CreateWatchRequest>,
) -> Result<Json<PriceWatch>, ApiError> {
    if request.price_threshold.is_none() && request.inventory_threshold.is_none() {
        return Err(ApiError::BadRequest(
            "watch requires a price_threshold or inventory_threshold".to_string(),
        ));
    }
    let deal_exists = service.store.get_deal(&request.deal_id).map_err(|err| {
        error!(error = %err, "get_deal failed");
        ApiError::Internal
    })?;
    if deal_exists.is_none() {
        return Err(ApiError::NotFound);
    }

    let watch = PriceWatch {
        watch_id: Uuid::new_v4().to_string(),
        user_id: request.user_id,
        deal_id: request.deal_id,
        price_threshold: request.price_threshold,
        inventory_threshold: request.inventory_threshold,
        active: true,
        last_notified: None,
        created_at: Utc::now(),
    };

    service.store.create_watch(&watch).map_err(|err| {
        error!(error = %err, "create_watch failed");
        ApiError::Internal
    })?;

    Ok(Json(watch))
}

#[derive(Debug, Deserialize)]
pub struct ListWatchesQuery {
    pub user_id: String,
}

async fn list_watches(
    Query(query): Query<ListWatchesQuery>,
    State(service): State<Arc<Service>>,
) -> Result<Json<Vec<PriceWatch>>, ApiError> {
    let watches = service.store.list_watches_by_user(&query.user_id).map_err(|err| {
        error!(error = %err, "list_watches_by_user failed");
        ApiError::Internal
    })?;
    Ok(Json(watches))
}

async fn delete_watch(
    Path(watch_id): Path<String>,
    State(service): State<Arc<Service>>,
) -> Result<StatusCode, ApiError> {
    service.store.deactivate_watch(&watch_id).map_err(|err| {
        error!(error = %err, "deactivate_watch failed");
        ApiError::Internal
    })?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ExplainResponse {
    pub explanation: String,
    pub price_analysis: ExplainPriceAnalysis,
    pub recommendation: String,
    pub comparison: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExplainPriceAnalysis {
    pub price: f64,
    pub avg_30d_price: f64,
    pub discount_percent: f64,
    pub deal_flagged: bool,
}

async fn explain_deal(
    Path(deal_id): Path<String>,
    State(service): State<Arc<Service>>,
) -> Result<Json<ExplainResponse>, ApiError> {
    let deal = service
        .store
        .get_deal(&deal_id)
        .map_err(|err| {
            error!(error = %err, "get_deal failed");
            ApiError::Internal
        })?
        .ok_or(ApiError::NotFound)?;

    let explanation = service.explainer.explain_deal(&deal).await;
    let recommendation = if deal.is_deal_flagged() {
        "Book now: this is a genuine dip below its recent average.".to_string()
    } else {
        "Fairly priced; worth comparing against alternatives before booking.".to_string()
    };

    // Peer comparison: the strongest other deals of the same type.
    let mut peers = service
        .store
        .list_active_deals(Some(deal.deal_type))
        .unwrap_or_default();
    peers.retain(|p| p.deal_id != deal.deal_id);
    peers.sort_by(|a, b| b.score.cmp(&a.score));
    peers.truncate(3);
    let comparison = peers
        .iter()
        .map(|p| format!("{} at ${:.0} (score {})", p.title, p.price, p.score))
        .collect();

    Ok(Json(ExplainResponse {
        explanation,
        price_analysis: ExplainPriceAnalysis {
            price: deal.price,
            avg_30d_price: deal.avg_30d_price,
            discount_percent: deal.discount_percent,
            deal_flagged: deal.is_deal_flagged(),
        },
        recommendation,
        comparison,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub question: String,
    pub deal_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PolicyResponse {
    pub answer: String,
    pub sources: Vec<String>,
}

async fn policy(
    State(service): State<Arc<Service>>,
    Json(request): Json<PolicyRequest>,
) -> Result<Json<PolicyResponse>, ApiError> {
    let deal_type = match &request.deal_id {
        Some(deal_id) => {
            let deal = service
                .store
                .get_deal(deal_id)
                .map_err(|err| {
                    error!(error = %err, "get_deal failed");
                    ApiError::Internal
                })?
                .ok_or(ApiError::NotFound)?;
            deal.deal_type
        }
        None => DealType::Flight,
    };

    let answer = service.policy_answerer.answer(&service.cache, deal_type, &request.question).await;
    Ok(Json(PolicyResponse {
        answer,
        sources: vec!["canned-policy-knowledge-base".to_string()],
    }))
}

async fn get_preferences(
    Path(user_id): Path<String>,
    State(service): State<Arc<Service>>,
) -> Result<Json<UserPreference>, ApiError> {
    let pref = service.store.get_user_preference(&user_id).map_err(|err| {
        error!(error = %err, "get_user_preference failed");
        ApiError::Internal
    })?;
    Ok(Json(pref))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePreferencesRequest {
    pub budget_max: Option<f64>,
    #[serde(default)]
    pub preferred_airlines: Vec<String>,
    #[serde(default)]
    pub direct_flights_only: bool,
    pub time_preference: Option<String>,
}

async fn post_preferences(
    Path(user_id): Path<String>,
    State(service): State<Arc<Service>>,
    Json(request): Json<UpdatePreferencesRequest>,
) -> Result<Json<UserPreference>, ApiError> {
    let mut pref = service.store.get_user_preference(&user_id).map_err(|err| {
        error!(error = %err, "get_user_preference failed");
        ApiError::Internal
    })?;
    pref.budget_max = request.budget_max;
    pref.preferred_airlines = request.preferred_airlines;
    pref.direct_flights_only = request.direct_flights_only;
    pref.time_preference = request.time_preference;
    pref.updated_at = Utc::now();
    service.store.save_user_preference(&pref).map_err(|err| {
        error!(error = %err, "save_user_preference failed");
        ApiError::Internal
    })?;
    Ok(Json(pref))
}

async fn metrics(State(service): State<Arc<Service>>) -> Json<crate::session_hub::HubStats> {
    Json(service.session_hub.stats())
}

#[derive(Debug, Deserialize)]
pub struct PlanTripRequest {
    pub user_id: String,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub budget_max: Option<f64>,
    #[serde(default = "default_party_size")]
    pub party_size: i64,
    #[serde(default)]
    pub nights: i64,
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub preferences: Vec<String>,
}

impl PlanTripRequest {
    /// Explicit dates win over a raw `nights` count; either way at least
    /// one night is booked.
    fn nights(&self) -> i64 {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => (end - start).num_days().max(1),
            _ => self.nights.max(1),
        }
    }
}

fn default_party_size() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct PlanTripResponse {
    pub plan_id: String,
    pub flight_deal_id: String,
    pub hotel_deal_id: String,
    pub total_cost: f64,
    pub fit_score: u32,
    pub explanation: String,
    pub alternatives: Vec<crate::models::TripPlan>,
}

async fn plan_trip(
    State(service): State<Arc<Service>>,
    Json(request): Json<PlanTripRequest>,
) -> Result<Json<PlanTripResponse>, ApiError> {
    let snapshot = serde_json::json!({
        "origin": request.origin,
        "destination": request.destination,
        "budget_max": request.budget_max,
        "start_date": request.start_date,
        "end_date": request.end_date,
        "party_size": request.party_size,
    });

    let trip_update = |status: &str, plan_id: Option<String>| {
        service.session_hub.send_to_user(
            &request.user_id,
            WsServerEvent::TripUpdate {
                status: status.to_string(),
                plan_id,
            },
            true,
        );
    };

    trip_update("planning_started", None);
    trip_update("searching", None);

    let planned = match service.trip_planner.plan_trip(
        &request.user_id,
        request.origin.as_deref(),
        request.destination.as_deref(),
        request.budget_max,
        request.party_size,
        request.nights(),
        &request.preferences,
        snapshot,
    ) {
        Ok(Some(planned)) => planned,
        Ok(None) => {
            trip_update("failed", None);
            return Err(ApiError::NotFound);
        }
        Err(err) => {
            error!(error = %err, "plan_trip failed");
            trip_update("failed", None);
            return Err(ApiError::Internal);
        }
    };

    trip_update("results_found", Some(planned.plan.plan_id.clone()));
    trip_update("completed", Some(planned.plan.plan_id.clone()));

    Ok(Json(PlanTripResponse {
        plan_id: planned.plan.plan_id,
        flight_deal_id: planned.plan.itinerary.flight_deal_id,
        hotel_deal_id: planned.plan.itinerary.hotel_deal_id,
        total_cost: planned.plan.total_cost,
        fit_score: planned.plan.fit_score,
        explanation: planned.explanation,
        alternatives: planned.alternatives,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
    /// Client-supplied turns override the stored conversation log, for
    /// front-ends that keep their own session transcript.
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

#[derive(Debug, Deserialize)]
pub struct ChatTurn {
    pub message: String,
    #[serde(default)]
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub intent: String,
    pub entities: serde_json::Value,
    pub confidence: f64,
    pub response: String,
}

async fn chat(
    State(service): State<Arc<Service>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let history = if request.conversation_history.is_empty() {
        service
            .store
            .recent_conversations(&request.user_id, 5)
            .map_err(|err| {
                error!(error = %err, "recent_conversations failed");
                ApiError::Internal
            })?
    } else {
        request
            .conversation_history
            .iter()
            .map(|turn| Conversation {
                user_id: request.user_id.clone(),
                message: turn.message.clone(),
                response: turn.response.clone(),
                intent: String::new(),
                entities: serde_json::Value::Null,
                created_at: Utc::now(),
            })
            .collect()
    };

    let parsed = service.intent_parser.parse(&request.message, &history, &service.cache).await;

    let response_text = match parsed.intent {
        crate::intent::Intent::AskPolicy => {
            let deal_type = parsed
                .entities
                .get("deal_type")
                .and_then(|v| v.as_str())
                .map(|s| if s == "hotel" { DealType::Hotel } else { DealType::Flight })
                .unwrap_or(DealType::Flight);
            service
                .policy_answerer
                .answer(&service.cache, deal_type, &request.message)
                .await
        }
        crate::intent::Intent::Search
        | crate::intent::Intent::SearchFlights
        | crate::intent::Intent::SearchHotels => {
            let destination = parsed.entities.get("destination").and_then(|v| v.as_str());
            let kind = match parsed.intent {
                crate::intent::Intent::SearchHotels => "hotel",
                crate::intent::Intent::SearchFlights => "flight",
                _ => "travel",
            };
            match destination {
                Some(dest) => format!("Looking for the best {kind} deals to {dest}."),
                None => "Where would you like to go?".to_string(),
            }
        }
        crate::intent::Intent::FindDeals => {
            let mut top = service.store.list_active_deals(None).unwrap_or_default();
            top.sort_by(|a, b| b.score.cmp(&a.score));
            top.truncate(3);
            if top.is_empty() {
                "No standout deals right now; check back soon or set a price watch.".to_string()
            } else {
                let titles: Vec<&str> = top.iter().map(|d| d.title.as_str()).collect();
                format!("Today's strongest deals: {}.", titles.join("; "))
            }
        }
        crate::intent::Intent::TrackPrice => {
            "Tell me which deal to watch and your price or inventory threshold, and I'll alert you when it trips.".to_string()
        }
        crate::intent::Intent::PlanTrip => {
            "I can put together a flight and hotel bundle once I know your origin, destination, and budget.".to_string()
        }
        crate::intent::Intent::RefineSearch => {
            "Got it, refining your search with what you've told me so far.".to_string()
        }
        crate::intent::Intent::Unknown => {
            "I didn't quite catch that. Try asking about flights, hotels, or a full trip plan.".to_string()
        }
    };

    let entry = Conversation {
        user_id: request.user_id.clone(),
        message: request.message.clone(),
        response: response_text.clone(),
        intent: parsed.intent.as_str().to_string(),
        entities: parsed.entities.clone(),
        created_at: Utc::now(),
    };
    service.store.append_conversation(&entry).map_err(|err| {
        error!(error = %err, "append_conversation failed");
        ApiError::Internal
    })?;

    if let Some(destination) = parsed.entities.get("destination").and_then(|v| v.as_str()) {
        let mut pref = service
            .store
            .get_user_preference(&request.user_id)
            .map_err(|err| {
                error!(error = %err, "get_user_preference failed");
                ApiError::Internal
            })?;
        let destination = aliases::city_to_code(destination).unwrap_or(destination).to_string();
        crate::models::UserPreference::push_bounded(&mut pref.favorite_destinations, destination.clone());
        if let Some(origin) = parsed.entities.get("origin").and_then(|v| v.as_str()) {
            let origin = aliases::city_to_code(origin).unwrap_or(origin);
            crate::models::UserPreference::push_bounded(
                &mut pref.frequent_routes,
                format!("{origin}-{destination}"),
            );
        }
        pref.search_count += 1;
        pref.updated_at = Utc::now();
        let _ = service.store.save_user_preference(&pref);
    }

    Ok(Json(ChatResponse {
        intent: parsed.intent.as_str().to_string(),
        entities: parsed.entities,
        confidence: parsed.confidence,
        response: response_text,
    }))
}
