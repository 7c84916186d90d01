use std::{collections::BTreeMap, io::Write, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Form, Json, Router,
};
use flate2::{write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};

pub const GZIP_PAYLOAD: &str = "compressed payload";
pub const LINES_PAYLOAD: &str = "alpha\nbeta\ngamma\n";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
}

#[derive(Deserialize)]
pub struct NewItem {
    pub name: String,
}

#[derive(Deserialize)]
pub struct RenameItem {
    pub name: Option<String>,
}

/// What `/echo` saw of the request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub query: Option<String>,
    /// Lowercased header names.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Deserialize)]
pub struct Delay {
    #[serde(default)]
    pub ms: u64,
}

pub type Db = Arc<RwLock<BTreeMap<u64, Item>>>;

/// Starts with item 42.
pub fn app() -> Router {
    let seed = Item {
        id: 42,
        name: "answer".to_string(),
    };
    let db: Db = Arc::new(RwLock::new(BTreeMap::from([(seed.id, seed)])));
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route("/items/{id}", get(lookup_item).put(rename_item).delete(delete_item))
        .route("/items/{id}/detail", get(item_detail))
        .route("/echo", any(echo))
        .route("/gzip", get(gzip))
        .route("/lines", get(lines))
        .route("/slow", get(slow))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_items(State(db): State<Db>) -> Json<Vec<Item>> {
    let items = db.read().await;
    Json(items.values().cloned().collect())
}

/// Form-encoded create; answers 201.
async fn create_item(State(db): State<Db>, Form(input): Form<NewItem>) -> (StatusCode, Json<Item>) {
    let mut items = db.write().await;
    let id = items.keys().next_back().map_or(1, |last| last + 1);
    let item = Item { id, name: input.name };
    items.insert(id, item.clone());
    (StatusCode::CREATED, Json(item))
}

/// Plain-text existence check.
async fn lookup_item(State(db): State<Db>, Path(id): Path<u64>) -> (StatusCode, &'static str) {
    if db.read().await.contains_key(&id) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::NOT_FOUND, "no such item")
    }
}

async fn item_detail(State(db): State<Db>, Path(id): Path<u64>) -> Result<Json<Item>, StatusCode> {
    let items = db.read().await;
    items.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn rename_item(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<RenameItem>,
) -> Result<Json<Item>, StatusCode> {
    let mut items = db.write().await;
    let item = items.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(name) = input.name {
        item.name = name;
    }
    Ok(Json(item.clone()))
}

async fn delete_item(State(db): State<Db>, Path(id): Path<u64>) -> StatusCode {
    match db.write().await.remove(&id) {
        Some(_) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    }
}

async fn echo(method: Method, RawQuery(query): RawQuery, headers: HeaderMap, body: String) -> Json<Echo> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();
    Json(Echo {
        method: method.to_string(),
        query,
        headers,
        body,
    })
}

async fn gzip() -> Result<impl IntoResponse, StatusCode> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(GZIP_PAYLOAD.as_bytes())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let compressed = encoder.finish().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((
        [
            (header::CONTENT_ENCODING, "gzip"),
            (header::CONTENT_TYPE, "text/plain; charset=UTF-8"),
        ],
        compressed,
    ))
}

async fn lines() -> &'static str {
    LINES_PAYLOAD
}

async fn slow(Query(delay): Query<Delay>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(delay.ms)).await;
    "late"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_serializes_to_json() {
        let item = Item {
            id: 7,
            name: "lamp".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["name"], "lamp");
    }

    #[test]
    fn rename_fields_are_optional() {
        let input: RenameItem = serde_json::from_str("{}").unwrap();
        assert!(input.name.is_none());
    }

    #[test]
    fn delay_defaults_to_zero() {
        let delay: Delay = serde_json::from_str("{}").unwrap();
        assert_eq!(delay.ms, 0);
    }

    #[test]
    fn echo_roundtrips_through_json() {
        let echo = Echo {
            method: "GET".to_string(),
            query: Some("a=1".to_string()),
            headers: BTreeMap::from([("accept".to_string(), "*/*".to_string())]),
            body: String::new(),
        };
        let back: Echo = serde_json::from_str(&serde_json::to_string(&echo).unwrap()).unwrap();
        assert_eq!(back.query.as_deref(), Some("a=1"));
        assert_eq!(back.headers["accept"], "*/*");
    }
}
