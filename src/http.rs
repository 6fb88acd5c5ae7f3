//! HTTP matchmaking surface.
//!
//! `POST /matchmake/{method}/{roomName}` with the client options as the JSON
//! body. Successful responses carry the room summary and the reserved
//! session id; refusals come back as 4xx `{code, message}`, infrastructure
//! failures as 5xx.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use crate::driver::Conditions;
use crate::errors::MatchmakeError;
use crate::matchmaker::{Matchmaker, ReservedSeat};

pub fn router(matchmaker: Matchmaker) -> Router {
    Router::new()
        .route("/matchmake/{method}/{room_name}", post(matchmake))
        .route("/rooms/{room_name}", get(list_rooms))
        .with_state(matchmaker)
}

#[derive(Debug, Serialize)]
struct RoomSummary {
    #[serde(rename = "roomId")]
    room_id: String,
    #[serde(rename = "processId")]
    process_id: String,
    #[serde(rename = "publicAddress", skip_serializing_if = "Option::is_none")]
    public_address: Option<String>,
    name: String,
}

#[derive(Debug, Serialize)]
struct MatchmakeResponse {
    room: RoomSummary,
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

fn success(seat: ReservedSeat) -> Response {
    let body = MatchmakeResponse {
        room: RoomSummary {
            room_id: seat.room.room_id,
            process_id: seat.room.process_id,
            public_address: seat.room.public_address,
            name: seat.room.name,
        },
        session_id: seat.session_id,
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn failure(error: &MatchmakeError) -> Response {
    let status = match error {
        MatchmakeError::RoomNotFound(_) | MatchmakeError::NoHandler(_) => StatusCode::NOT_FOUND,
        other if other.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorBody {
        code: error.code().value(),
        message: error.to_string(),
    };
    (status, Json(body)).into_response()
}

async fn matchmake(
    Path((method, room_name)): Path<(String, String)>,
    State(matchmaker): State<Matchmaker>,
    Json(options): Json<Value>,
) -> Response {
    let result = match method.as_str() {
        "joinOrCreate" => {
            matchmaker
                .join_or_create(&room_name, options, Value::Null)
                .await
        }
        "join" => matchmaker.join(&room_name, options, Value::Null).await,
        "create" => matchmaker.create(&room_name, options, Value::Null).await,
        // for these two the path segment is a room id, not a room name
        "joinById" => matchmaker.join_by_id(&room_name, options, Value::Null).await,
        "reconnect" => {
            let token = options
                .get("reconnectionToken")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            matchmaker.reconnect(&room_name, &token).await
        }
        other => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    code: crate::protocol::ErrorCode::MatchmakeUnhandled.value(),
                    message: format!("unknown matchmaking method `{other}`"),
                }),
            )
                .into_response();
        }
    };

    match result {
        Ok(seat) => success(seat),
        Err(error) => {
            tracing::debug!(%room_name, %method, %error, "Matchmake request failed");
            failure(&error)
        }
    }
}

async fn list_rooms(
    Path(room_name): Path<String>,
    State(matchmaker): State<Matchmaker>,
) -> Response {
    let mut conditions = Conditions::new();
    conditions.insert("name".to_string(), Value::String(room_name));
    conditions.insert("private".to_string(), Value::Bool(false));
    match matchmaker.query(conditions).await {
        Ok(listings) => (StatusCode::OK, Json(listings)).into_response(),
        Err(error) => failure(&error),
    }
}
