use async_compression::tokio::bufread::GzipEncoder;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::rand::rand_bytes;
use openssl::symm::{encrypt, Cipher};
use sha2::{Digest, Sha256};
use slog::{error, info, Logger};
use std::path::Path;
use tokio::io::{AsyncReadExt, BufReader};

use crate::WarehouseError;

const DEFAULT_STAGE_REGION: &str = "us-east-1";
const AES_BLOCK_SIZE: usize = 16;

/// Temporary credentials the warehouse hands out for one upload
#[derive(Clone)]
pub struct StageCredentials {
    pub key_id: String,
    pub secret_key: String,
    pub token: Option<String>,
}

/// Per-query master key for stages that require client-side encryption
#[derive(Clone)]
pub struct StageEncryption {
    /// base64 AES key, 128 or 256 bits
    pub master_key: String,
    pub query_id: String,
    pub smk_id: i64,
}

/// Payload encrypted with a fresh file key, plus the object metadata the stage expects
pub struct EncryptedPayload {
    pub data: Vec<u8>,
    pub wrapped_key: String,
    pub iv: String,
    pub material_descriptor: String,
}

fn cbc_cipher(key_len: usize) -> Result<Cipher, WarehouseError> {
    match key_len {
        16 => Ok(Cipher::aes_128_cbc()),
        24 => Ok(Cipher::aes_192_cbc()),
        32 => Ok(Cipher::aes_256_cbc()),
        other => Err(WarehouseError::Upload(format!(
            "unsupported stage master key length {} bytes",
            other
        ))),
    }
}

fn ecb_cipher(key_len: usize) -> Result<Cipher, WarehouseError> {
    match key_len {
        16 => Ok(Cipher::aes_128_ecb()),
        24 => Ok(Cipher::aes_192_ecb()),
        32 => Ok(Cipher::aes_256_ecb()),
        other => Err(WarehouseError::Upload(format!(
            "unsupported stage master key length {} bytes",
            other
        ))),
    }
}

/// AES-CBC with a random file key and iv; the file key is wrapped with the master key in ECB mode
pub fn encrypt_payload(
    payload: &[u8],
    encryption: &StageEncryption,
) -> Result<EncryptedPayload, WarehouseError> {
    let crypto_failed = |e: openssl::error::ErrorStack| WarehouseError::Upload(e.to_string());
    let master_key = STANDARD
        .decode(encryption.master_key.trim())
        .map_err(|e| WarehouseError::Protocol(format!("invalid stage master key: {}", e)))?;

    let mut file_key = vec![0u8; master_key.len()];
    let mut iv = [0u8; AES_BLOCK_SIZE];
    rand_bytes(&mut file_key).map_err(crypto_failed)?;
    rand_bytes(&mut iv).map_err(crypto_failed)?;

    let data = encrypt(cbc_cipher(file_key.len())?, &file_key, Some(&iv), payload)
        .map_err(crypto_failed)?;
    let wrapped_key = encrypt(ecb_cipher(master_key.len())?, &master_key, None, &file_key)
        .map_err(crypto_failed)?;
    let material_descriptor = serde_json::json!({
        "queryId": encryption.query_id,
        "smkId": encryption.smk_id.to_string(),
        "keySize": (master_key.len() * 8).to_string(),
    })
    .to_string();

    Ok(EncryptedPayload {
        data,
        wrapped_key: STANDARD.encode(wrapped_key),
        iv: STANDARD.encode(iv),
        material_descriptor,
    })
}

/// S3 location backing a table stage, `bucket/prefix/`
#[derive(Debug, Clone, PartialEq)]
pub struct StageLocation {
    pub bucket: String,
    pub prefix: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl StageLocation {
    pub fn parse(
        location: &str,
        region: Option<String>,
        endpoint: Option<String>,
    ) -> Result<Self, WarehouseError> {
        let (bucket, prefix) = location.split_once('/').unwrap_or((location, ""));
        if bucket.is_empty() {
            return Err(WarehouseError::Protocol(format!(
                "stage location without bucket: {location:?}"
            )));
        }
        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };
        Ok(StageLocation {
            bucket: bucket.to_string(),
            prefix,
            region: region.filter(|r| !r.is_empty()),
            endpoint: endpoint.filter(|e| !e.is_empty()),
        })
    }

    pub fn key_for(&self, file_name: &str) -> String {
        format!("{}{}", self.prefix, file_name)
    }
}

pub struct S3Stage {
    client: Client,
    location: StageLocation,
    logger: Logger,
}

impl S3Stage {
    pub fn new(location: StageLocation, credentials: StageCredentials, logger: Logger) -> Self {
        let region = location
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_STAGE_REGION.to_string());
        let credentials = Credentials::new(
            credentials.key_id,
            credentials.secret_key,
            credentials.token,
            None,
            "warehouse-stage",
        );
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials);

        if let Some(endpoint) = &location.endpoint {
            info!(logger, "Using custom stage endpoint: {}", endpoint);
            let endpoint = if endpoint.starts_with("http") {
                endpoint.clone()
            } else {
                format!("https://{}", endpoint)
            };
            config = config.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(config.build()),
            location,
            logger,
        }
    }

    /// Upload a local file into the stage, gzip-compressed when `compress` is set and
    /// encrypted when the stage hands out a master key. Returns the object key.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        compress: bool,
        encryption: Option<&StageEncryption>,
    ) -> Result<String, WarehouseError> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                WarehouseError::Upload(format!("invalid upload path {}", local_path.display()))
            })?;
        let key = if compress {
            self.location.key_for(&format!("{}.gz", file_name))
        } else {
            self.location.key_for(file_name)
        };

        let payload = read_payload(local_path, compress).await?;
        let digest = stage_digest(&payload);

        info!(
            self.logger,
            "Uploading {} to s3://{}/{}",
            local_path.display(),
            self.location.bucket,
            key
        );

        let mut request = self
            .client
            .put_object()
            .bucket(&self.location.bucket)
            .key(&key)
            .metadata("sfc-digest", digest);
        let body = match encryption {
            Some(encryption) => {
                let encrypted = encrypt_payload(&payload, encryption)?;
                request = request
                    .metadata("x-amz-key", encrypted.wrapped_key)
                    .metadata("x-amz-iv", encrypted.iv)
                    .metadata("x-amz-matdesc", encrypted.material_descriptor);
                encrypted.data
            }
            None => payload,
        };

        request
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                error!(self.logger, "Failed to upload to stage: {}", e);
                WarehouseError::Upload(e.to_string())
            })?;

        info!(
            self.logger,
            "Successfully uploaded to s3://{}/{}", self.location.bucket, key
        );
        Ok(key)
    }
}

async fn read_payload(path: &Path, compress: bool) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut payload = Vec::new();
    if compress {
        GzipEncoder::new(BufReader::new(file))
            .read_to_end(&mut payload)
            .await?;
    } else {
        BufReader::new(file).read_to_end(&mut payload).await?;
    }
    Ok(payload)
}

/// Base64 SHA-256 of the (compressed, unencrypted) bytes, stored as `sfc-digest` object metadata
pub fn stage_digest(payload: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(payload))
}
