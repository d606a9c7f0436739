use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use slog::{debug, info, Logger};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    S3Stage, StageCredentials, StageEncryption, StageLocation, WarehouseConnection,
    WarehouseConnector, WarehouseError, WarehouseSettings,
};

const CLIENT_APP_ID: &str = "weather-ingest";
const SNOWFLAKE_ACCEPT: &str = "application/snowflake";
const HOST_SUFFIX: &str = ".snowflakecomputing.com";
const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct SnowflakeResponse<T> {
    data: Option<T>,
    message: Option<String>,
    code: Option<String>,
    #[serde(default)]
    success: bool,
}

impl<T> SnowflakeResponse<T> {
    fn in_progress(&self) -> bool {
        matches!(
            self.code.as_deref(),
            Some(QUERY_IN_PROGRESS) | Some(QUERY_IN_PROGRESS_ASYNC)
        )
    }

    fn into_data(self) -> Result<T, WarehouseError> {
        if !self.success {
            return Err(WarehouseError::Rejected {
                code: self.code.unwrap_or_else(|| String::from("unknown")),
                message: self
                    .message
                    .unwrap_or_else(|| String::from("no message in response")),
            });
        }
        self.data
            .ok_or_else(|| WarehouseError::Protocol(String::from("response has no data")))
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    get_result_url: Option<String>,
    #[serde(default)]
    stage_info: Option<StageInfo>,
    #[serde(default, rename = "src_locations")]
    src_locations: Vec<String>,
    #[serde(default)]
    auto_compress: bool,
    #[serde(default)]
    encryption_material: Option<EncryptionMaterial>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptionMaterial {
    query_stage_master_key: String,
    query_id: String,
    smk_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageInfo {
    location_type: String,
    location: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    end_point: Option<String>,
    #[serde(default)]
    is_client_side_encrypted: bool,
    creds: StageCreds,
}

#[derive(Debug, Deserialize)]
struct StageCreds {
    #[serde(rename = "AWS_KEY_ID")]
    key_id: String,
    #[serde(rename = "AWS_SECRET_KEY")]
    secret_key: String,
    #[serde(rename = "AWS_TOKEN", default)]
    token: Option<String>,
}

/// `xy12345.us-east-1` -> `https://xy12345.us-east-1.snowflakecomputing.com`
pub fn account_base_url(account: &str) -> String {
    let host = account.trim().trim_end_matches(HOST_SUFFIX);
    format!("https://{}{}", host, HOST_SUFFIX)
}

/// Login wants the bare account locator without region or cloud segments
pub fn account_name(account: &str) -> String {
    account
        .trim()
        .split('.')
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

fn parse_url(base: &str, params: &[(&str, String)]) -> Result<Url, WarehouseError> {
    Url::parse_with_params(base, params)
        .map_err(|e| WarehouseError::Protocol(format!("invalid url {}: {}", base, e)))
}

/// Opens sessions over the connector REST protocol
pub struct SnowflakeConnector {
    logger: Logger,
    settings: WarehouseSettings,
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl SnowflakeConnector {
    pub fn new(logger: Logger, settings: WarehouseSettings) -> Result<Self, WarehouseError> {
        let client = Client::builder()
            .user_agent(format!("{}/{}", CLIENT_APP_ID, env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base_url = account_base_url(&settings.account);
        Ok(SnowflakeConnector {
            logger,
            settings,
            client,
            base_url,
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Talk to a host other than the one derived from the account locator
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn login_body(&self) -> Value {
        json!({
            "data": {
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
                "ACCOUNT_NAME": account_name(&self.settings.account),
                "LOGIN_NAME": self.settings.user,
                "PASSWORD": self.settings.password,
            }
        })
    }
}

#[async_trait]
impl WarehouseConnector for SnowflakeConnector {
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>, WarehouseError> {
        let url = parse_url(
            &format!("{}/session/v1/login-request", self.base_url),
            &[
                ("databaseName", self.settings.database.clone()),
                ("schemaName", self.settings.schema.clone()),
                ("warehouse", self.settings.warehouse.clone()),
                ("request_id", Uuid::now_v7().to_string()),
            ],
        )?;
        info!(
            self.logger,
            "opening warehouse session for {}@{} ({}.{})",
            self.settings.user,
            self.settings.account,
            self.settings.database,
            self.settings.schema
        );

        let response: SnowflakeResponse<LoginData> = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(&self.login_body())
            .send()
            .await?
            .json()
            .await?;
        let login = response.into_data()?;
        debug!(self.logger, "warehouse session opened");

        Ok(Box::new(SnowflakeConnection {
            logger: self.logger.clone(),
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: login.token,
            sequence: AtomicU64::new(0),
            poll_interval: self.poll_interval,
        }))
    }
}

/// One authenticated session; PUT statements upload to the stage the server hands back
pub struct SnowflakeConnection {
    logger: Logger,
    client: Client,
    base_url: String,
    token: String,
    sequence: AtomicU64,
    poll_interval: Duration,
}

impl SnowflakeConnection {
    fn auth_header(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.token)
    }

    async fn poll_result(
        &self,
        result_url: &str,
    ) -> Result<SnowflakeResponse<QueryData>, WarehouseError> {
        tokio::time::sleep(self.poll_interval).await;
        let url = format!("{}{}", self.base_url, result_url);
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, self.auth_header())
            .header(header::ACCEPT, SNOWFLAKE_ACCEPT)
            .send()
            .await?
            .json()
            .await?;
        Ok(response)
    }

    async fn upload(&self, data: QueryData) -> Result<(), WarehouseError> {
        let stage = data.stage_info.ok_or_else(|| {
            WarehouseError::Protocol(String::from("upload response without stage info"))
        })?;
        if !stage.location_type.eq_ignore_ascii_case("S3") {
            return Err(WarehouseError::Upload(format!(
                "unsupported stage location type {}",
                stage.location_type
            )));
        }
        let encryption = match (stage.is_client_side_encrypted, data.encryption_material) {
            (true, Some(material)) => Some(StageEncryption {
                master_key: material.query_stage_master_key,
                query_id: material.query_id,
                smk_id: material.smk_id,
            }),
            (true, None) => {
                return Err(WarehouseError::Protocol(String::from(
                    "stage is client-side encrypted but no encryption material was sent",
                )))
            }
            (false, _) => None,
        };
        if data.src_locations.is_empty() {
            return Err(WarehouseError::Protocol(String::from(
                "upload response lists no source files",
            )));
        }

        let location = StageLocation::parse(&stage.location, stage.region, stage.end_point)?;
        let credentials = StageCredentials {
            key_id: stage.creds.key_id,
            secret_key: stage.creds.secret_key,
            token: stage.creds.token,
        };
        let uploader = S3Stage::new(location, credentials, self.logger.clone());
        for source in &data.src_locations {
            uploader
                .upload_file(Path::new(source), data.auto_compress, encryption.as_ref())
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl WarehouseConnection for SnowflakeConnection {
    async fn execute(&self, statement: &str) -> Result<(), WarehouseError> {
        let sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let url = parse_url(
            &format!("{}/queries/v1/query-request", self.base_url),
            &[("requestId", Uuid::now_v7().to_string())],
        )?;
        let submitted_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        debug!(self.logger, "executing statement #{}: {}", sequence_id, statement);

        let mut response: SnowflakeResponse<QueryData> = self
            .client
            .post(url)
            .header(header::AUTHORIZATION, self.auth_header())
            .header(header::ACCEPT, SNOWFLAKE_ACCEPT)
            .json(&json!({
                "sqlText": statement,
                "asyncExec": false,
                "sequenceId": sequence_id,
                "querySubmissionTime": submitted_ms,
            }))
            .send()
            .await?
            .json()
            .await?;

        while response.in_progress() {
            let result_url = response
                .data
                .as_ref()
                .and_then(|d| d.get_result_url.clone())
                .ok_or_else(|| {
                    WarehouseError::Protocol(String::from(
                        "statement still running but no result url given",
                    ))
                })?;
            debug!(self.logger, "statement #{} still running", sequence_id);
            response = self.poll_result(&result_url).await?;
        }

        let data = response.into_data()?;
        if data.command.as_deref() == Some("UPLOAD") {
            self.upload(data).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), WarehouseError> {
        let url = parse_url(
            &format!("{}/session", self.base_url),
            &[("delete", String::from("true"))],
        )?;
        let response: SnowflakeResponse<Value> = self
            .client
            .post(url)
            .header(header::AUTHORIZATION, self.auth_header())
            .header(header::ACCEPT, SNOWFLAKE_ACCEPT)
            .send()
            .await?
            .json()
            .await?;
        if !response.success {
            return Err(WarehouseError::Rejected {
                code: response.code.unwrap_or_else(|| String::from("unknown")),
                message: response.message.unwrap_or_default(),
            });
        }
        info!(self.logger, "warehouse session closed");
        Ok(())
    }
}
