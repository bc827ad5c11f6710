use pretty_assertions::assert_eq;
use serde_json::json;
use studydesk::{ApiClient, ApiError};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn get_returns_parsed_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/disciplines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "nome": "Cálculo I", "trilha_id": 2}
        ])))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let value = client.get("/disciplines").await.unwrap();
    assert_eq!(value, json!([{"id": 1, "nome": "Cálculo I", "trilha_id": 2}]));
}

#[tokio::test]
async fn empty_success_body_reads_as_empty_object() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/tasks/7"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    assert_eq!(client.delete("/tasks/7").await.unwrap(), json!({}));
}

#[tokio::test]
async fn post_sends_json_with_content_type() {
    let server = MockServer::start().await;
    let body = json!({"titulo": "Revisar limites", "disciplina_id": 1});
    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .and(header("content-type", "application/json"))
        .and(body_json(body.clone()))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 12})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    assert_eq!(client.post("/tasks", &body).await.unwrap(), json!({"id": 12}));
}

#[tokio::test]
async fn error_status_carries_body_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/reviews/3"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Data de revisão inválida"))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let err = client.put("/reviews/3", &json!({"data": "ontem"})).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.to_string(), "Data de revisão inválida");
    assert!(matches!(err, ApiError::Status { .. }));
}

#[tokio::test]
async fn malformed_success_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let err = client.get("/sessions").await.unwrap_err();
    assert!(matches!(err, ApiError::Decode { .. }), "{err:?}");
}

#[tokio::test]
async fn probe_counts_any_http_answer() {
    // nothing mounted: the server answers 404
    let server = MockServer::start().await;
    let client = ApiClient::new(&server.uri()).unwrap();
    assert!(client.probe().await);
}
