//! # Admin HTTP Surface
//!
//! A thin, unauthenticated interface over a `Fabric`, grounded in
//! `apiserver.py`'s equally bare Flask surface. Not a hardened production
//! surface: no auth, no rate limiting, no request body size caps beyond
//! axum's defaults.
//!
//! Routes:
//! - `GET /api/v0/objects[?key=value...]` — query the registry
//! - `GET /api/v0/objects/:id` — fetch one object
//! - `PUT /api/v0/objects/:id` — originate (or overwrite) an object
//! - `PATCH /api/v0/objects/:id` — set attributes on an originated object
//! - `DELETE /api/v0/objects/:id` — unpublish an originated object
//! - `GET /api/v0/collections` — list distinct collection names
//! - `GET /api/v0/collections/:name` — objects in a collection
//! - `GET /api/v0/events` — long-poll for the next applied event

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query as QueryParams, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::event::Event;
use crate::fabric::Fabric;
use crate::object::ObjectDict;
use crate::query::Query;
use crate::signals::Signal;

/// How long a `GET /api/v0/events` call waits for the next event before
/// returning `204 No Content`.
const EVENTS_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);

struct ApiState {
    fabric: Arc<Fabric>,
    events: broadcast::Sender<Event>,
}

/// Build the router. Registers a single permanent signal listener that
/// bridges `Signal::EventReceived` into a broadcast channel so each
/// long-poll request can subscribe without leaking a listener per call.
pub fn router(fabric: Arc<Fabric>) -> Router {
    let (tx, _rx) = broadcast::channel(256);
    let bridge = tx.clone();
    fabric.signals().connect(
        Signal::EventReceived,
        Box::new(move |event| {
            let _ = bridge.send(event.clone());
        }),
    );

    let state = Arc::new(ApiState { fabric, events: tx });

    Router::new()
        .route("/api/v0/objects", get(list_objects))
        .route(
            "/api/v0/objects/:id",
            get(get_object).put(put_object).patch(patch_object).delete(delete_object),
        )
        .route("/api/v0/collections", get(list_collections))
        .route("/api/v0/collections/:name", get(get_collection))
        .route("/api/v0/events", get(long_poll_events))
        .with_state(state)
}

fn query_from_params(params: HashMap<String, String>) -> Query {
    if params.is_empty() {
        return Query::all();
    }
    let mut iter = params.into_iter();
    let (first_key, first_value) = iter.next().expect("non-empty params has a first entry");
    let mut query = Query::eq(first_key, first_value);
    for (key, value) in iter {
        query = query.and(key, value);
    }
    query
}

async fn list_objects(
    State(state): State<Arc<ApiState>>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
) -> Json<Vec<ObjectDict>> {
    let query = query_from_params(params);
    let dicts = state.fabric.query(&query).into_iter().map(|o| o.to_dict()).collect();
    Json(dicts)
}

async fn get_object(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.fabric.registry().try_get(&id) {
        Ok(object) => Json(object.to_dict()).into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct PutPayload {
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    attrs: HashMap<String, Value>,
}

async fn put_object(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(payload): Json<PutPayload>,
) -> impl IntoResponse {
    let Some(publisher) = state.fabric.publisher_handle() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let object = crate::object::Object::new_originated(
        state.fabric.origin().clone(),
        Some(id),
        payload.collection,
        Arc::clone(state.fabric.signals()),
    );
    if let Err(err) = object.batch_set(payload.attrs, None) {
        return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
    }
    object.notify(state.fabric.registry(), &publisher);
    Json(object.to_dict()).into_response()
}

async fn patch_object(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(attrs): Json<HashMap<String, Value>>,
) -> impl IntoResponse {
    let object = match state.fabric.registry().try_get(&id) {
        Ok(object) => object,
        Err(err) => return (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    };
    let Some(publisher) = state.fabric.publisher_handle() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    if !object.is_originator() {
        return StatusCode::FORBIDDEN.into_response();
    }
    if let Err(err) = object.batch_set(attrs, None) {
        return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
    }
    object.notify(state.fabric.registry(), &publisher);
    Json(object.to_dict()).into_response()
}

async fn delete_object(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> impl IntoResponse {
    let object = match state.fabric.registry().try_get(&id) {
        Ok(object) => object,
        Err(err) => return (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    };
    let Some(publisher) = state.fabric.publisher_handle() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    match object.delete(state.fabric.registry(), &publisher) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::FORBIDDEN, err.to_string()).into_response(),
    }
}

async fn list_collections(State(state): State<Arc<ApiState>>) -> Json<Vec<String>> {
    let mut collections: HashSet<String> = HashSet::new();
    for object in state.fabric.registry().snapshot() {
        if let Some(collection) = object.collection() {
            collections.insert(collection);
        }
    }
    let mut collections: Vec<String> = collections.into_iter().collect();
    collections.sort();
    Json(collections)
}

async fn get_collection(State(state): State<Arc<ApiState>>, Path(name): Path<String>) -> Json<Vec<ObjectDict>> {
    let dicts = state
        .fabric
        .query(&Query::eq("collection", name))
        .into_iter()
        .map(|o| o.to_dict())
        .collect();
    Json(dicts)
}

async fn long_poll_events(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let mut receiver = state.events.subscribe();
    match tokio::time::timeout(EVENTS_LONG_POLL_TIMEOUT, receiver.recv()).await {
        Ok(Ok(event)) => Json(event).into_response(),
        Ok(Err(_)) | Err(_) => StatusCode::NO_CONTENT.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::origin::Origin;

    fn test_fabric() -> Arc<Fabric> {
        Fabric::new(Origin::new("p1"), Settings::default())
    }

    #[test]
    fn query_from_empty_params_matches_everything() {
        let query = query_from_params(HashMap::new());
        assert!(query.all);
    }

    #[test]
    fn query_from_params_builds_conjunction() {
        let mut params = HashMap::new();
        params.insert("collection".to_string(), "origin".to_string());
        let query = query_from_params(params);
        assert!(!query.all);
        assert_eq!(query.constraints.get("collection"), Some(&Value::String("origin".into())));
    }

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let _router = router(test_fabric());
    }
}
