// HTTP request handler layer.
//
// Thin translation between the wire and the draft coordinator: parse the
// request, call the one matching coordinator operation, map the result (or
// error) to a JSON body and status code. No draft logic lives here.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::draft::card::{CardRecord, CardStatus, Color};
use crate::draft::coordinator::{DraftCoordinator, DraftError};
use crate::scryfall::ScryfallClient;

pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DraftCoordinator>,
    pub scryfall: Arc<ScryfallClient>,
    /// Shared secret for the reset endpoint; `None` disables reset entirely.
    pub admin_secret: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/cards", get(get_cards))
        .route("/api/select-card", post(select_card))
        .route("/api/reset", post(reset_pool))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CardsQuery {
    #[serde(default)]
    color: String,
    #[serde(default)]
    user: String,
}

/// A candidate offered to the player. Only the name matters for the draft;
/// the image is display sugar.
#[derive(Debug, Serialize)]
struct CandidateBody {
    name: String,
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectCardBody {
    user_name: String,
    card_name: String,
    card_color: String,
}

/// The full updated card returned by a successful pick.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CardBody {
    name: String,
    color: Color,
    status: CardStatus,
    reserved_by: Option<String>,
    image: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResetBody {
    message: String,
    cleared: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "unauthorized".into(),
        }
    }
}

impl From<DraftError> for ApiError {
    fn from(err: DraftError) -> Self {
        let status = match &err {
            DraftError::InvalidColor(_)
            | DraftError::InvalidUser
            | DraftError::InvalidCardName => StatusCode::BAD_REQUEST,
            DraftError::CardNotFound { .. } => StatusCode::NOT_FOUND,
            DraftError::AlreadyReserved { .. } | DraftError::ColorAlreadyDrafted { .. } => {
                StatusCode::CONFLICT
            }
            DraftError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/cards?color=<Color>&user=<User>
async fn get_cards(
    State(state): State<AppState>,
    Query(query): Query<CardsQuery>,
) -> Result<Json<Vec<CandidateBody>>, ApiError> {
    let cards = state
        .coordinator
        .list_candidates(&query.color, &query.user)
        .await?;

    let mut candidates = Vec::with_capacity(cards.len());
    for card in cards {
        candidates.push(CandidateBody {
            image: state.scryfall.image_url(&card.name).await,
            name: card.name,
        });
    }
    Ok(Json(candidates))
}

/// POST /api/select-card
async fn select_card(
    State(state): State<AppState>,
    Json(body): Json<SelectCardBody>,
) -> Result<Json<CardBody>, ApiError> {
    let card = state
        .coordinator
        .select_card(&body.user_name, &body.card_name, &body.card_color)
        .await?;

    Ok(Json(card_body(&state, card).await))
}

/// POST /api/reset, guarded by the admin secret header.
async fn reset_pool(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResetBody>, ApiError> {
    let presented = headers
        .get(ADMIN_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    let authorized = match (&state.admin_secret, presented) {
        (Some(secret), Some(header)) => secret == header,
        _ => false,
    };
    if !authorized {
        warn!("rejected pool reset with missing or wrong admin secret");
        return Err(ApiError::unauthorized());
    }

    let report = state.coordinator.reset_pool().await?;
    Ok(Json(ResetBody {
        message: "all reset".into(),
        cleared: report.cleared,
    }))
}

async fn card_body(state: &AppState, card: CardRecord) -> CardBody {
    CardBody {
        image: state.scryfall.image_url(&card.name).await,
        name: card.name,
        color: card.color,
        status: card.status,
        reserved_by: card.reserved_by,
    }
}
