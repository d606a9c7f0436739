mod s3_stage;
mod snowflake;

pub use s3_stage::*;
pub use snowflake::*;

use async_trait::async_trait;
use slog::{info, Logger};
use std::{fmt, path::Path};

use crate::{IngestError, LoadStep};

#[derive(thiserror::Error, Debug)]
pub enum WarehouseError {
    #[error("error talking to warehouse: {0}")]
    Http(#[from] reqwest::Error),
    #[error("warehouse rejected request (code {code}): {message}")]
    Rejected { code: String, message: String },
    #[error("unexpected warehouse response: {0}")]
    Protocol(String),
    #[error("stage upload failed: {0}")]
    Upload(String),
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open warehouse session; statements run one at a time
#[async_trait]
pub trait WarehouseConnection: Send + Sync {
    async fn execute(&self, statement: &str) -> Result<(), WarehouseError>;
    async fn close(&self) -> Result<(), WarehouseError>;
}

#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>, WarehouseError>;
}

/// Credentials and session target, built by the caller and handed to the connector
#[derive(Clone, PartialEq)]
pub struct WarehouseSettings {
    pub account: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: String,
    pub warehouse: String,
}

impl fmt::Debug for WarehouseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseSettings")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("warehouse", &self.warehouse)
            .finish()
    }
}

/// Stage-then-copy loader for one target table
pub struct WarehouseLoader {
    logger: Logger,
    table: String,
}

impl WarehouseLoader {
    pub fn new(logger: Logger, table: impl Into<String>) -> Self {
        WarehouseLoader {
            logger,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Upload to the table stage; the stage gzips the file, adding `.gz`
    pub fn stage_statement(&self, path: &Path) -> String {
        format!(
            "PUT 'file://{}' @%{} AUTO_COMPRESS=TRUE",
            escape_literal(&path.to_string_lossy()),
            self.table
        )
    }

    /// Whole JSON line into `raw`, paired with the stage scan's start time
    pub fn copy_statement(&self, file_name: &str) -> String {
        format!(
            "COPY INTO {table}(raw, loaded_at) \
             FROM (SELECT $1, METADATA$START_SCAN_TIME FROM @%{table}) \
             FILES = ('{file}.gz') \
             FILE_FORMAT = (TYPE = 'JSON')",
            table = self.table,
            file = escape_literal(file_name)
        )
    }

    /// Stage then copy; the copy never runs after a failed stage
    pub async fn load(
        &self,
        connection: &dyn WarehouseConnection,
        path: &Path,
    ) -> Result<(), IngestError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        connection
            .execute(&self.stage_statement(path))
            .await
            .map_err(|source| IngestError::Load {
                step: LoadStep::Stage,
                source,
            })?;
        info!(self.logger, "staged {} to @%{}", file_name, self.table);

        connection
            .execute(&self.copy_statement(&file_name))
            .await
            .map_err(|source| IngestError::Load {
                step: LoadStep::Copy,
                source,
            })?;
        info!(self.logger, "copied {} into {}", file_name, self.table);
        Ok(())
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
