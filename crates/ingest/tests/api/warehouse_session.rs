use crate::helpers::test_logger;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use weather_ingest::{
    SnowflakeConnector, WarehouseConnection, WarehouseConnector, WarehouseError, WarehouseSettings,
};
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_HEADER: &str = "Snowflake Token=\"session-token\"";

fn settings() -> WarehouseSettings {
    WarehouseSettings {
        account: String::from("xy12345.us-east-1"),
        user: String::from("LOADER"),
        password: String::from("secret"),
        database: String::from("WEATHER"),
        schema: String::from("RAW"),
        warehouse: String::from("COMPUTE_WH"),
    }
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "data": data,
        "code": null,
        "message": null,
        "success": true
    }))
}

fn running(result_url: &str, code: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "data": {"getResultUrl": result_url},
        "code": code,
        "message": "Asynchronous execution in progress.",
        "success": true
    }))
}

async fn warehouse() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/v1/login-request"))
        .and(query_param("databaseName", "WEATHER"))
        .and(query_param("schemaName", "RAW"))
        .and(query_param("warehouse", "COMPUTE_WH"))
        .respond_with(ok(json!({"token": "session-token"})))
        .expect(1)
        .mount(&server)
        .await;
    server
}

async fn open(server: &MockServer) -> Box<dyn WarehouseConnection> {
    SnowflakeConnector::new(test_logger(), settings())
        .unwrap()
        .with_base_url(server.uri())
        .with_poll_interval(Duration::from_millis(10))
        .connect()
        .await
        .unwrap()
}

async fn bodies_at(server: &MockServer, request_path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path() == request_path)
        .map(|request| serde_json::from_slice(&request.body).unwrap())
        .collect()
}

#[tokio::test]
async fn login_sends_credentials_and_close_deletes_session() {
    let server = warehouse().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .and(query_param("delete", "true"))
        .and(header("authorization", TOKEN_HEADER))
        .respond_with(ok(Value::Null))
        .expect(1)
        .mount(&server)
        .await;

    let connection = open(&server).await;
    connection.close().await.unwrap();

    let login = &bodies_at(&server, "/session/v1/login-request").await[0];
    assert_eq!(login["data"]["ACCOUNT_NAME"], "XY12345");
    assert_eq!(login["data"]["LOGIN_NAME"], "LOADER");
    assert_eq!(login["data"]["PASSWORD"], "secret");
}

#[tokio::test]
async fn failed_login_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/v1/login-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "code": "390100",
            "message": "Incorrect username or password was specified.",
            "success": false
        })))
        .mount(&server)
        .await;

    let result = SnowflakeConnector::new(test_logger(), settings())
        .unwrap()
        .with_base_url(server.uri())
        .connect()
        .await;
    match result {
        Err(WarehouseError::Rejected { code, .. }) => assert_eq!(code, "390100"),
        Err(other) => panic!("expected rejection, got {}", other),
        Ok(_) => panic!("login should fail"),
    }
}

#[tokio::test]
async fn statements_carry_token_and_increasing_sequence() {
    let server = warehouse().await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .and(header("authorization", TOKEN_HEADER))
        .respond_with(ok(json!({"queryId": "01b6"})))
        .expect(2)
        .mount(&server)
        .await;

    let connection = open(&server).await;
    connection.execute("SELECT 1").await.unwrap();
    connection.execute("SELECT 2").await.unwrap();

    let queries = bodies_at(&server, "/queries/v1/query-request").await;
    assert_eq!(queries[0]["sqlText"], "SELECT 1");
    assert_eq!(queries[0]["sequenceId"], 1);
    assert_eq!(queries[1]["sequenceId"], 2);
}

#[tokio::test]
async fn running_statement_is_polled_until_done() {
    let server = warehouse().await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(running("/queries/01b6/result", "333334"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queries/01b6/result"))
        .and(header("authorization", TOKEN_HEADER))
        .respond_with(running("/queries/01b6/result", "333333"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queries/01b6/result"))
        .respond_with(ok(json!({"queryId": "01b6"})))
        .expect(1)
        .mount(&server)
        .await;

    let connection = open(&server).await;
    connection
        .execute("COPY INTO raw_weather FROM @%raw_weather")
        .await
        .unwrap();
}

#[tokio::test]
async fn running_statement_without_result_url_is_protocol_error() {
    let server = warehouse().await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {},
            "code": "333333",
            "message": null,
            "success": true
        })))
        .mount(&server)
        .await;

    let connection = open(&server).await;
    assert!(matches!(
        connection.execute("SELECT 1").await,
        Err(WarehouseError::Protocol(_))
    ));
}

#[tokio::test]
async fn failed_statement_surfaces_server_code() {
    let server = warehouse().await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {},
            "code": "002003",
            "message": "Table 'RAW_WEATHER' does not exist or not authorized.",
            "success": false
        })))
        .mount(&server)
        .await;

    let connection = open(&server).await;
    match connection.execute("COPY INTO raw_weather").await {
        Err(WarehouseError::Rejected { code, message }) => {
            assert_eq!(code, "002003");
            assert!(message.contains("does not exist"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

fn upload_response(server: &MockServer, source: &Path, encrypted: bool) -> ResponseTemplate {
    let mut data = json!({
        "command": "UPLOAD",
        "src_locations": [source.to_string_lossy()],
        "autoCompress": true,
        "stageInfo": {
            "locationType": "S3",
            "location": "stage-bucket/tables/42/",
            "region": "us-east-1",
            "endPoint": server.uri(),
            "isClientSideEncrypted": encrypted,
            "creds": {"AWS_KEY_ID": "AKIATEST", "AWS_SECRET_KEY": "secret", "AWS_TOKEN": "token"}
        }
    });
    if encrypted {
        data["encryptionMaterial"] = json!({
            "queryStageMasterKey": "BwcHBwcHBwcHBwcHBwcHBw==",
            "queryId": "01b6-0000-abcd",
            "smkId": 4321
        });
    }
    ok(data)
}

fn batch_file(dir: &Path) -> std::path::PathBuf {
    let source = dir.join("Atlanta_Georgia_history_20240812_130509.json");
    std::fs::write(&source, "{\"location\":\"Atlanta, Georgia\"}\n").unwrap();
    source
}

#[tokio::test]
async fn put_statement_uploads_compressed_file_to_stage() {
    let server = warehouse().await;
    let dir = tempfile::tempdir().unwrap();
    let source = batch_file(dir.path());

    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(upload_response(&server, &source, false))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(
            r"^/stage-bucket/tables/42/Atlanta_Georgia_history_20240812_130509\.json\.gz$",
        ))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let connection = open(&server).await;
    connection
        .execute(&format!(
            "PUT 'file://{}' @%raw_weather AUTO_COMPRESS=TRUE",
            source.display()
        ))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|request| request.method.as_str() == "PUT")
        .unwrap();
    assert!(put.headers.contains_key("x-amz-meta-sfc-digest"));
    assert!(!put.headers.contains_key("x-amz-meta-x-amz-key"));
}

#[tokio::test]
async fn encrypted_stage_gets_key_metadata() {
    let server = warehouse().await;
    let dir = tempfile::tempdir().unwrap();
    let source = batch_file(dir.path());

    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(upload_response(&server, &source, true))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/stage-bucket/tables/42/.+\.json\.gz$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let connection = open(&server).await;
    connection
        .execute(&format!("PUT 'file://{}' @%raw_weather", source.display()))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|request| request.method.as_str() == "PUT")
        .unwrap();
    for key in ["x-amz-meta-x-amz-key", "x-amz-meta-x-amz-iv", "x-amz-meta-x-amz-matdesc"] {
        assert!(put.headers.contains_key(key), "missing {}", key);
    }
}

#[tokio::test]
async fn non_s3_stage_is_refused() {
    let server = warehouse().await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(ok(json!({
            "command": "UPLOAD",
            "src_locations": ["/tmp/batch.json"],
            "stageInfo": {
                "locationType": "AZURE",
                "location": "container/path/",
                "creds": {"AWS_KEY_ID": "", "AWS_SECRET_KEY": ""}
            }
        })))
        .mount(&server)
        .await;

    let connection = open(&server).await;
    assert!(matches!(
        connection.execute("PUT 'file:///tmp/batch.json' @%raw_weather").await,
        Err(WarehouseError::Upload(_))
    ));
}
