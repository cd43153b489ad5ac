//! In-memory stand-in for a FileMaker Server speaking both the Data API and
//! the OData API, used by the client's integration tests.
//!
//! Every table doubles as an OData entity set and a Data API layout, but the
//! two stores are independent. OData entities are keyed by their
//! `PrimaryKey` field; Data API records get sequential record ids.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Field OData keyed lookups match against.
pub const KEY_FIELD: &str = "PrimaryKey";

#[derive(Debug, Clone, Default)]
struct DataRecord {
    field_data: Map<String, Value>,
    mod_id: u64,
}

#[derive(Debug, Clone, Default)]
struct Layout {
    next_id: u64,
    records: BTreeMap<u64, DataRecord>,
}

/// Server-side state: accepted credentials, tables, and live session tokens.
#[derive(Debug, Default)]
pub struct MockState {
    username: String,
    password: String,
    tables: HashMap<String, Vec<Map<String, Value>>>,
    layouts: HashMap<String, Layout>,
    sessions: HashSet<String>,
}

impl MockState {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            ..Self::default()
        }
    }

    /// Register `name` as both an OData table and a Data API layout.
    pub fn with_table(mut self, name: &str) -> Self {
        self.tables.insert(name.to_string(), Vec::new());
        self.layouts.insert(name.to_string(), Layout::default());
        self
    }

    /// Invalidate every issued Data API token.
    pub fn expire_sessions(&mut self) {
        self.sessions.clear();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn basic_matches(&self, headers: &HeaderMap) -> bool {
        let expected = general_purpose::STANDARD.encode(format!("{}:{}", self.username, self.password));
        authorization(headers).and_then(|value| value.strip_prefix("Basic ")) == Some(expected.as_str())
    }

    fn bearer_matches(&self, headers: &HeaderMap) -> bool {
        authorization(headers)
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| self.sessions.contains(token))
    }
}

pub type Db = Arc<RwLock<MockState>>;

/// Shared state with user `admin` / `admin` and a `Contacts` table.
pub fn default_state() -> Db {
    Arc::new(RwLock::new(MockState::new("admin", "admin").with_table("Contacts")))
}

pub fn app() -> Router {
    app_with_state(default_state())
}

pub fn app_with_state(db: Db) -> Router {
    Router::new()
        .route(
            "/fmi/odata/{version}/{database}/{resource}",
            get(odata_get)
                .post(odata_post)
                .patch(odata_patch)
                .delete(odata_delete),
        )
        .route("/fmi/data/{version}/databases/{database}/sessions", post(create_session))
        .route(
            "/fmi/data/{version}/databases/{database}/sessions/{token}",
            delete(delete_session),
        )
        .route(
            "/fmi/data/{version}/databases/{database}/layouts/{layout}/records",
            get(list_records).post(create_record),
        )
        .route(
            "/fmi/data/{version}/databases/{database}/layouts/{layout}/records/{id}",
            get(get_record).patch(edit_record).delete(delete_record),
        )
        .route(
            "/fmi/data/{version}/databases/{database}/layouts/{layout}/_find",
            post(find_records),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, default_state()).await
}

pub async fn run_with_state(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock filemaker server listening");
    }
    axum::serve(listener, app_with_state(db)).await
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION).and_then(|value| value.to_str().ok())
}

// ---------------------------------------------------------------------------
// OData
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Key {
    Text(String),
    Number(i64),
}

#[derive(Debug, PartialEq)]
enum Resource {
    Table(String),
    Entity(String, Key),
    Script(String),
}

fn parse_resource(raw: &str) -> Option<Resource> {
    if let Some(name) = raw.strip_prefix("Script.") {
        return Some(Resource::Script(name.to_string()));
    }
    let Some(open) = raw.find('(') else {
        return Some(Resource::Table(raw.to_string()));
    };
    let table = &raw[..open];
    let inner = raw[open + 1..].strip_suffix(')')?;
    let key = match inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(text) => Key::Text(text.replace("''", "'")),
        None => Key::Number(inner.parse().ok()?),
    };
    Some(Resource::Entity(table.to_string(), key))
}

fn key_matches(record: &Map<String, Value>, key: &Key) -> bool {
    match (record.get(KEY_FIELD), key) {
        (Some(Value::String(value)), Key::Text(text)) => value == text,
        (Some(value), Key::Number(n)) => value.as_i64() == Some(*n),
        _ => false,
    }
}

#[derive(Debug)]
struct Filter {
    field: String,
    op: String,
    value: Value,
}

/// `field op value`, where text values are single-quoted.
fn parse_filter(raw: &str) -> Option<Filter> {
    let mut parts = raw.trim().splitn(3, ' ');
    let field = parts.next()?.to_string();
    let op = parts.next()?.to_string();
    let literal = parts.next()?.trim();
    if !matches!(op.as_str(), "eq" | "ne" | "gt" | "ge" | "lt" | "le") {
        return None;
    }
    let value = if let Some(text) = literal.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Value::String(text.replace("''", "'"))
    } else if let Ok(b) = literal.parse::<bool>() {
        Value::Bool(b)
    } else {
        let number = literal.parse::<f64>().ok()?;
        json!(number)
    };
    Some(Filter { field, op, value })
}

impl Filter {
    fn matches(&self, record: &Map<String, Value>) -> bool {
        let Some(actual) = record.get(&self.field) else {
            return false;
        };
        let ordering = match (actual, &self.value) {
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        };
        let Some(ordering) = ordering else {
            return self.op == "ne";
        };
        match self.op.as_str() {
            "eq" => ordering.is_eq(),
            "ne" => ordering.is_ne(),
            "gt" => ordering.is_gt(),
            "ge" => ordering.is_ge(),
            "lt" => ordering.is_lt(),
            "le" => ordering.is_le(),
            _ => false,
        }
    }
}

fn odata_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": {"code": "-1", "message": message}}))).into_response()
}

fn odata_collection(table: &str, records: Vec<Map<String, Value>>) -> Response {
    Json(json!({
        "@odata.context": format!("$metadata#{table}"),
        "value": records,
    }))
    .into_response()
}

/// Parse `$filter` when present. `Err` carries the 400 response.
fn query_filter(query: &HashMap<String, String>) -> Result<Option<Filter>, Response> {
    match query.get("$filter") {
        None => Ok(None),
        Some(raw) => parse_filter(raw)
            .map(Some)
            .ok_or_else(|| odata_error(StatusCode::BAD_REQUEST, "malformed $filter")),
    }
}

async fn odata_get(
    State(db): State<Db>,
    Path((_version, _database, resource)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let state = db.read().await;
    if !state.basic_matches(&headers) {
        return odata_error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    match parse_resource(&resource) {
        Some(Resource::Table(table)) => {
            let Some(records) = state.tables.get(&table) else {
                return odata_error(StatusCode::NOT_FOUND, "table not found");
            };
            let filter = match query_filter(&query) {
                Ok(filter) => filter,
                Err(response) => return response,
            };
            let top = query.get("$top").and_then(|top| top.parse::<usize>().ok());
            let selected: Vec<_> = records
                .iter()
                .filter(|record| filter.as_ref().map_or(true, |f| f.matches(record)))
                .take(top.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            odata_collection(&table, selected)
        }
        Some(Resource::Entity(table, key)) => {
            let Some(records) = state.tables.get(&table) else {
                return odata_error(StatusCode::NOT_FOUND, "table not found");
            };
            match records.iter().find(|record| key_matches(record, &key)) {
                Some(record) => Json(Value::Object(record.clone())).into_response(),
                None => odata_error(StatusCode::NOT_FOUND, "record not found"),
            }
        }
        _ => odata_error(StatusCode::BAD_REQUEST, "unsupported resource"),
    }
}

async fn odata_post(
    State(db): State<Db>,
    Path((_version, _database, resource)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = db.write().await;
    if !state.basic_matches(&headers) {
        return odata_error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    match parse_resource(&resource) {
        Some(Resource::Table(table)) => {
            let Some(records) = state.tables.get_mut(&table) else {
                return odata_error(StatusCode::NOT_FOUND, "table not found");
            };
            let Ok(Value::Object(mut record)) = serde_json::from_slice::<Value>(&body) else {
                return odata_error(StatusCode::BAD_REQUEST, "body must be a JSON object");
            };
            record
                .entry(KEY_FIELD)
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string().to_uppercase()));
            records.push(record.clone());
            debug!(%table, "odata record created");
            (StatusCode::CREATED, Json(Value::Object(record))).into_response()
        }
        Some(Resource::Script(name)) => {
            let parameter = if body.is_empty() {
                None
            } else {
                match serde_json::from_slice::<Value>(&body) {
                    Ok(value) => value.get("scriptParameterValue").cloned(),
                    Err(_) => return odata_error(StatusCode::BAD_REQUEST, "malformed script call"),
                }
            };
            let result_parameter = match parameter {
                Some(Value::String(text)) => Some(text),
                Some(other) => Some(other.to_string()),
                None => None,
            };
            debug!(script = %name, "script executed");
            Json(json!({"scriptResult": {"code": 0, "resultParameter": result_parameter}})).into_response()
        }
        _ => odata_error(StatusCode::BAD_REQUEST, "unsupported resource"),
    }
}

async fn odata_patch(
    State(db): State<Db>,
    Path((_version, _database, resource)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = db.write().await;
    if !state.basic_matches(&headers) {
        return odata_error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    let Ok(Value::Object(changes)) = serde_json::from_slice::<Value>(&body) else {
        return odata_error(StatusCode::BAD_REQUEST, "body must be a JSON object");
    };

    match parse_resource(&resource) {
        Some(Resource::Entity(table, key)) => {
            let Some(records) = state.tables.get_mut(&table) else {
                return odata_error(StatusCode::NOT_FOUND, "table not found");
            };
            let Some(record) = records.iter_mut().find(|record| key_matches(record, &key)) else {
                return odata_error(StatusCode::NOT_FOUND, "record not found");
            };
            merge(record, &changes);
            Json(Value::Object(record.clone())).into_response()
        }
        Some(Resource::Table(table)) => {
            let filter = match query_filter(&query) {
                Ok(Some(filter)) => filter,
                Ok(None) => return odata_error(StatusCode::BAD_REQUEST, "bulk update requires $filter"),
                Err(response) => return response,
            };
            let Some(records) = state.tables.get_mut(&table) else {
                return odata_error(StatusCode::NOT_FOUND, "table not found");
            };
            let mut updated = Vec::new();
            for record in records.iter_mut().filter(|record| filter.matches(record)) {
                merge(record, &changes);
                updated.push(record.clone());
            }
            odata_collection(&table, updated)
        }
        _ => odata_error(StatusCode::BAD_REQUEST, "unsupported resource"),
    }
}

async fn odata_delete(
    State(db): State<Db>,
    Path((_version, _database, resource)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut state = db.write().await;
    if !state.basic_matches(&headers) {
        return odata_error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    match parse_resource(&resource) {
        Some(Resource::Entity(table, key)) => {
            let Some(records) = state.tables.get_mut(&table) else {
                return odata_error(StatusCode::NOT_FOUND, "table not found");
            };
            let before = records.len();
            records.retain(|record| !key_matches(record, &key));
            if records.len() == before {
                return odata_error(StatusCode::NOT_FOUND, "record not found");
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Some(Resource::Table(table)) => {
            let filter = match query_filter(&query) {
                Ok(Some(filter)) => filter,
                Ok(None) => return odata_error(StatusCode::BAD_REQUEST, "bulk delete requires $filter"),
                Err(response) => return response,
            };
            let Some(records) = state.tables.get_mut(&table) else {
                return odata_error(StatusCode::NOT_FOUND, "table not found");
            };
            records.retain(|record| !filter.matches(record));
            StatusCode::NO_CONTENT.into_response()
        }
        _ => odata_error(StatusCode::BAD_REQUEST, "unsupported resource"),
    }
}

fn merge(record: &mut Map<String, Value>, changes: &Map<String, Value>) {
    for (key, value) in changes {
        record.insert(key.clone(), value.clone());
    }
}

// ---------------------------------------------------------------------------
// Data API
// ---------------------------------------------------------------------------

fn fm_ok(response: Value) -> Response {
    Json(json!({
        "response": response,
        "messages": [{"code": "0", "message": "OK"}],
    }))
    .into_response()
}

fn fm_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "response": {},
            "messages": [{"code": code, "message": message}],
        })),
    )
        .into_response()
}

fn invalid_token() -> Response {
    fm_error(StatusCode::UNAUTHORIZED, "952", "Invalid FileMaker Data API token (*)")
}

fn layout_missing() -> Response {
    fm_error(StatusCode::INTERNAL_SERVER_ERROR, "105", "Layout is missing")
}

fn record_missing() -> Response {
    fm_error(StatusCode::NOT_FOUND, "101", "Record is missing")
}

fn record_json(id: u64, record: &DataRecord) -> Value {
    json!({
        "fieldData": record.field_data,
        "portalData": {},
        "recordId": id.to_string(),
        "modId": record.mod_id.to_string(),
    })
}

fn data_response(records: Vec<Value>) -> Response {
    let count = records.len();
    fm_ok(json!({
        "dataInfo": {"returnedCount": count, "foundCount": count},
        "data": records,
    }))
}

async fn create_session(State(db): State<Db>, headers: HeaderMap) -> Response {
    let mut state = db.write().await;
    if !state.basic_matches(&headers) {
        return fm_error(StatusCode::UNAUTHORIZED, "212", "Invalid user account and/or password");
    }
    let token = Uuid::new_v4().simple().to_string();
    state.sessions.insert(token.clone());
    debug!("data api session opened");
    (
        [("X-FM-Data-Access-Token", token.clone())],
        fm_ok(json!({"token": token})),
    )
        .into_response()
}

async fn delete_session(
    State(db): State<Db>,
    Path((_version, _database, token)): Path<(String, String, String)>,
) -> Response {
    let mut state = db.write().await;
    if state.sessions.remove(&token) {
        fm_ok(json!({}))
    } else {
        invalid_token()
    }
}

async fn list_records(
    State(db): State<Db>,
    Path((_version, _database, layout)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let state = db.read().await;
    if !state.bearer_matches(&headers) {
        return invalid_token();
    }
    let Some(layout) = state.layouts.get(&layout) else {
        return layout_missing();
    };
    let records = layout
        .records
        .iter()
        .map(|(id, record)| record_json(*id, record))
        .collect();
    data_response(records)
}

async fn create_record(
    State(db): State<Db>,
    Path((_version, _database, layout)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = db.write().await;
    if !state.bearer_matches(&headers) {
        return invalid_token();
    }
    let Some(layout) = state.layouts.get_mut(&layout) else {
        return layout_missing();
    };
    let Some(field_data) = field_data(&body) else {
        return fm_error(StatusCode::INTERNAL_SERVER_ERROR, "1708", "Parameter value is invalid");
    };
    layout.next_id += 1;
    let id = layout.next_id;
    layout.records.insert(
        id,
        DataRecord {
            field_data,
            mod_id: 0,
        },
    );
    fm_ok(json!({"recordId": id.to_string(), "modId": "0"}))
}

async fn get_record(
    State(db): State<Db>,
    Path((_version, _database, layout, id)): Path<(String, String, String, u64)>,
    headers: HeaderMap,
) -> Response {
    let state = db.read().await;
    if !state.bearer_matches(&headers) {
        return invalid_token();
    }
    let Some(layout) = state.layouts.get(&layout) else {
        return layout_missing();
    };
    match layout.records.get(&id) {
        Some(record) => data_response(vec![record_json(id, record)]),
        None => record_missing(),
    }
}

async fn edit_record(
    State(db): State<Db>,
    Path((_version, _database, layout, id)): Path<(String, String, String, u64)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = db.write().await;
    if !state.bearer_matches(&headers) {
        return invalid_token();
    }
    let Some(layout) = state.layouts.get_mut(&layout) else {
        return layout_missing();
    };
    let Some(changes) = field_data(&body) else {
        return fm_error(StatusCode::INTERNAL_SERVER_ERROR, "1708", "Parameter value is invalid");
    };
    let Some(record) = layout.records.get_mut(&id) else {
        return record_missing();
    };
    merge(&mut record.field_data, &changes);
    record.mod_id += 1;
    fm_ok(json!({"modId": record.mod_id.to_string()}))
}

async fn delete_record(
    State(db): State<Db>,
    Path((_version, _database, layout, id)): Path<(String, String, String, u64)>,
    headers: HeaderMap,
) -> Response {
    let mut state = db.write().await;
    if !state.bearer_matches(&headers) {
        return invalid_token();
    }
    let Some(layout) = state.layouts.get_mut(&layout) else {
        return layout_missing();
    };
    match layout.records.remove(&id) {
        Some(_) => fm_ok(json!({})),
        None => record_missing(),
    }
}

/// Requests in `query` are OR-ed; criteria within one request are AND-ed.
/// A criterion is an exact match, optionally prefixed with `=` or `==`.
async fn find_records(
    State(db): State<Db>,
    Path((_version, _database, layout)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let state = db.read().await;
    if !state.bearer_matches(&headers) {
        return invalid_token();
    }
    let Some(layout) = state.layouts.get(&layout) else {
        return layout_missing();
    };
    let Some(requests) = body.get("query").and_then(Value::as_array) else {
        return fm_error(StatusCode::INTERNAL_SERVER_ERROR, "1708", "Parameter value is invalid");
    };

    let found: Vec<Value> = layout
        .records
        .iter()
        .filter(|(_, record)| {
            requests.iter().any(|request| {
                request.as_object().is_some_and(|criteria| {
                    criteria
                        .iter()
                        .all(|(field, criterion)| criterion_matches(record.field_data.get(field), criterion))
                })
            })
        })
        .map(|(id, record)| record_json(*id, record))
        .collect();

    if found.is_empty() {
        return fm_error(StatusCode::INTERNAL_SERVER_ERROR, "401", "No records match the request");
    }
    data_response(found)
}

fn criterion_matches(actual: Option<&Value>, criterion: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    let wanted = match criterion {
        Value::String(text) => text.trim_start_matches('=').to_string(),
        other => other.to_string(),
    };
    match actual {
        Value::String(text) => *text == wanted,
        other => other.to_string() == wanted,
    }
}

fn field_data(body: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(body).ok()?.get("fieldData")? {
        Value::Object(map) => Some(map.clone()),
        _ => None,
    }
}
