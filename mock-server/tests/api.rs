use axum::http::{self, Request, StatusCode};
use axum::response::Response;
use axum::routing::RouterIntoService;
use http_body_util::BodyExt;
use fmpro_mock_server::app;
use serde_json::Value;
use tower::{Service, ServiceExt};

const ODATA: &str = "/fmi/odata/v4/Db";
const DATA: &str = "/fmi/data/vLatest/databases/Db";
/// base64("admin:admin")
const BASIC: &str = "Basic YWRtaW46YWRtaW4=";

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn request(method: &str, uri: &str, auth: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(http::header::AUTHORIZATION, auth)
        .body(body.to_string())
        .unwrap()
}

async fn send(app: &mut RouterIntoService<String>, request: Request<String>) -> Response {
    ServiceExt::ready(app).await.unwrap().call(request).await.unwrap()
}

async fn open_session(app: &mut RouterIntoService<String>) -> String {
    let resp = send(app, request("POST", &format!("{DATA}/sessions"), BASIC, "{}")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-fm-data-access-token"));
    let json = body_json(resp).await;
    json["response"]["token"].as_str().unwrap().to_string()
}

// --- odata ---

#[tokio::test]
async fn odata_rejects_wrong_credentials() {
    let resp = app()
        .oneshot(request("GET", &format!("{ODATA}/Contacts"), "Basic d3Jvbmc6d3Jvbmc=", ""))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn odata_empty_table_is_enveloped() {
    let resp = app()
        .oneshot(request("GET", &format!("{ODATA}/Contacts"), BASIC, ""))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert!(json["@odata.context"].is_string());
    assert_eq!(json["value"], serde_json::json!([]));
}

#[tokio::test]
async fn odata_unknown_table_returns_404() {
    let resp = app()
        .oneshot(request("GET", &format!("{ODATA}/Nope"), BASIC, ""))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn odata_malformed_filter_returns_400() {
    let resp = app()
        .oneshot(request(
            "GET",
            &format!("{ODATA}/Contacts?$filter=name%20like%20'A'"),
            BASIC,
            "",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn odata_script_echoes_parameter() {
    let resp = app()
        .oneshot(request(
            "POST",
            &format!("{ODATA}/Script.Greet"),
            BASIC,
            r#"{"scriptParameterValue":"hi"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["scriptResult"]["code"], 0);
    assert_eq!(json["scriptResult"]["resultParameter"], "hi");
}

#[tokio::test]
async fn odata_lifecycle() {
    let mut app = app().into_service();

    // create
    let resp = send(
        &mut app,
        request("POST", &format!("{ODATA}/Contacts"), BASIC, r#"{"PrimaryKey":"K1","name":"Ann","age":40}"#),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert_eq!(created["name"], "Ann");

    // get by key
    let resp = send(&mut app, request("GET", &format!("{ODATA}/Contacts('K1')"), BASIC, "")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["age"], 40);

    // filter
    let resp = send(
        &mut app,
        request("GET", &format!("{ODATA}/Contacts?$filter=age%20gt%2030"), BASIC, ""),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["value"].as_array().unwrap().len(), 1);

    // patch by key
    let resp = send(
        &mut app,
        request("PATCH", &format!("{ODATA}/Contacts('K1')"), BASIC, r#"{"age":41}"#),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated = body_json(resp).await;
    assert_eq!(updated["age"], 41);
    assert_eq!(updated["name"], "Ann");

    // delete
    let resp = send(&mut app, request("DELETE", &format!("{ODATA}/Contacts('K1')"), BASIC, "")).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(resp).await.is_empty());

    // delete again is a 404
    let resp = send(&mut app, request("DELETE", &format!("{ODATA}/Contacts('K1')"), BASIC, "")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- data api ---

#[tokio::test]
async fn data_api_session_requires_valid_credentials() {
    let resp = app()
        .oneshot(request("POST", &format!("{DATA}/sessions"), "Basic d3Jvbmc6d3Jvbmc=", "{}"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["messages"][0]["code"], "212");
}

#[tokio::test]
async fn data_api_records_require_bearer_token() {
    let resp = app()
        .oneshot(request("GET", &format!("{DATA}/layouts/Contacts/records"), BASIC, ""))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["messages"][0]["code"], "952");
}

#[tokio::test]
async fn data_api_unknown_layout_returns_500() {
    let mut app = app().into_service();
    let token = open_session(&mut app).await;

    let resp = send(
        &mut app,
        request("GET", &format!("{DATA}/layouts/Nope/records"), &format!("Bearer {token}"), ""),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn data_api_lifecycle() {
    let mut app = app().into_service();
    let token = open_session(&mut app).await;
    let bearer = format!("Bearer {token}");
    let records = format!("{DATA}/layouts/Contacts/records");

    // create
    let resp = send(
        &mut app,
        request("POST", &records, &bearer, r#"{"fieldData":{"name":"Ann","city":"Rome"}}"#),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["response"]["recordId"], "1");

    // list
    let resp = send(&mut app, request("GET", &records, &bearer, "")).await;
    let json = body_json(resp).await;
    assert_eq!(json["response"]["data"][0]["fieldData"]["name"], "Ann");

    // edit
    let resp = send(
        &mut app,
        request("PATCH", &format!("{records}/1"), &bearer, r#"{"fieldData":{"city":"Milan"}}"#),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["response"]["modId"], "1");

    // find
    let resp = send(
        &mut app,
        request(
            "POST",
            &format!("{DATA}/layouts/Contacts/_find"),
            &bearer,
            r#"{"query":[{"city":"==Milan"}]}"#,
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["response"]["data"][0]["recordId"], "1");

    // find with no match
    let resp = send(
        &mut app,
        request(
            "POST",
            &format!("{DATA}/layouts/Contacts/_find"),
            &bearer,
            r#"{"query":[{"city":"==Paris"}]}"#,
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(resp).await["messages"][0]["code"], "401");

    // delete, then delete again
    let resp = send(&mut app, request("DELETE", &format!("{records}/1"), &bearer, "")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&mut app, request("DELETE", &format!("{records}/1"), &bearer, "")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // logout invalidates the token
    let resp = send(&mut app, request("DELETE", &format!("{DATA}/sessions/{token}"), &bearer, "")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&mut app, request("GET", &records, &bearer, "")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
