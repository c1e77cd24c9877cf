use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use chrono::{DateTime, Utc};
use tracing::debug;

use mediagate_blocklist::{BlocklistBackend, BlocklistEntry, BlocklistError, InsertOutcome};
use mediagate_core::ContentHash;

use crate::config::DynamoConfig;
use crate::table::{ATTR_EXPIRES_AT, ATTR_FILE_HASH, ATTR_INSERTED_AT_MS};

/// DynamoDB-backed implementation of [`BlocklistBackend`].
///
/// One item per content hash, keyed by `file_hash`. `expires_at` holds epoch
/// seconds so the table's native TTL can reap expired items; until it does,
/// the conditional put treats an expired item as absent.
pub struct DynamoBlocklistBackend {
    client: Client,
    table_name: String,
}

impl DynamoBlocklistBackend {
    /// Create a new backend from the provided configuration.
    ///
    /// Loads AWS credentials and configuration from the environment and
    /// optionally overrides the endpoint URL for local development.
    pub async fn new(config: &DynamoConfig) -> Self {
        let client = build_client(config).await;
        Self::from_client(client, config)
    }

    /// Create a new backend from an existing `DynamoDB` client.
    pub fn from_client(client: Client, config: &DynamoConfig) -> Self {
        Self {
            client,
            table_name: config.table_name.clone(),
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn decode(item: &HashMap<String, AttributeValue>) -> Result<BlocklistEntry, BlocklistError> {
        let hash = match item.get(ATTR_FILE_HASH) {
            Some(AttributeValue::S(s)) => ContentHash::parse(s)
                .ok_or_else(|| BlocklistError::Serialization(format!("invalid file_hash: {s}")))?,
            _ => return Err(BlocklistError::Serialization("missing file_hash".into())),
        };

        let inserted_at = match item.get(ATTR_INSERTED_AT_MS) {
            Some(AttributeValue::N(n)) => parse_number(n)
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| BlocklistError::Serialization(format!("invalid inserted_at_ms: {n}")))?,
            _ => return Err(BlocklistError::Serialization("missing inserted_at_ms".into())),
        };

        let expires_at = match item.get(ATTR_EXPIRES_AT) {
            Some(AttributeValue::N(n)) => Some(
                parse_number(n)
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .ok_or_else(|| BlocklistError::Serialization(format!("invalid expires_at: {n}")))?,
            ),
            _ => None,
        };

        Ok(BlocklistEntry {
            hash,
            inserted_at,
            expires_at,
        })
    }
}

fn parse_number(n: &str) -> Option<i64> {
    n.parse::<i64>().ok()
}

fn epoch_secs(at: DateTime<Utc>) -> AttributeValue {
    AttributeValue::N(at.timestamp().to_string())
}

/// Map a service error code to the blocklist error taxonomy.
pub(crate) fn classify_code(code: Option<&str>, message: String) -> BlocklistError {
    match code {
        Some(
            "ThrottlingException"
            | "ProvisionedThroughputExceededException"
            | "RequestLimitExceeded",
        ) => BlocklistError::Throttled(message),
        Some("InternalServerError" | "ServiceUnavailable") => BlocklistError::Unavailable(message),
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "MissingAuthenticationToken"
            | "InvalidSignatureException"
            | "ExpiredTokenException",
        ) => BlocklistError::Unauthorized(message),
        Some("ResourceNotFoundException") => BlocklistError::NotFound(message),
        Some("ValidationException" | "SerializationException") => {
            BlocklistError::InvalidRequest(message)
        }
        _ => BlocklistError::Backend(message),
    }
}

/// Classify an SDK error. Transport failures and timeouts are retryable.
pub(crate) fn classify<E, R>(err: SdkError<E, R>) -> BlocklistError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            BlocklistError::Connection(message)
        }
        SdkError::ConstructionFailure(_) => BlocklistError::InvalidRequest(message),
        SdkError::ServiceError(ctx) => classify_code(ctx.err().code(), message),
        _ => BlocklistError::Backend(message),
    }
}

#[async_trait]
impl BlocklistBackend for DynamoBlocklistBackend {
    async fn put_if_absent(&self, entry: &BlocklistEntry) -> Result<InsertOutcome, BlocklistError> {
        let mut put = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item(ATTR_FILE_HASH, AttributeValue::S(entry.hash.as_str().to_owned()))
            .item(
                ATTR_INSERTED_AT_MS,
                AttributeValue::N(entry.inserted_at.timestamp_millis().to_string()),
            )
            .condition_expression(format!(
                "attribute_not_exists({ATTR_FILE_HASH}) OR {ATTR_EXPIRES_AT} <= :now"
            ))
            .expression_attribute_values(":now", epoch_secs(entry.inserted_at));

        if let Some(expires_at) = entry.expires_at {
            put = put.item(ATTR_EXPIRES_AT, epoch_secs(expires_at));
        }

        match put.send().await {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) => {
                if let SdkError::ServiceError(ctx) = &err
                    && ctx.err().is_conditional_check_failed_exception()
                {
                    debug!(hash = %entry.hash, "blocklist entry already present");
                    return Ok(InsertOutcome::AlreadyPresent);
                }
                Err(classify(err))
            }
        }
    }

    async fn get(&self, hash: &ContentHash) -> Result<Option<BlocklistEntry>, BlocklistError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(ATTR_FILE_HASH, AttributeValue::S(hash.as_str().to_owned()))
            .consistent_read(true)
            .send()
            .await
            .map_err(classify)?;

        result.item().map(Self::decode).transpose()
    }

    async fn delete(&self, hash: &ContentHash) -> Result<bool, BlocklistError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key(ATTR_FILE_HASH, AttributeValue::S(hash.as_str().to_owned()))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(classify)?;

        Ok(result.attributes().is_some_and(|attrs| !attrs.is_empty()))
    }
}

/// Build an AWS `DynamoDB` client from the given configuration.
pub async fn build_client(config: &DynamoConfig) -> Client {
    let mut aws_config =
        aws_config::from_env().region(aws_config::Region::new(config.region.clone()));

    if let Some(endpoint) = &config.endpoint_url {
        aws_config = aws_config.endpoint_url(endpoint);
    }

    let sdk_config = aws_config.load().await;
    Client::new(&sdk_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, AttributeValue)]) -> HashMap<String, AttributeValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn throttling_is_retryable() {
        for code in [
            "ThrottlingException",
            "ProvisionedThroughputExceededException",
            "RequestLimitExceeded",
            "InternalServerError",
        ] {
            let err = classify_code(Some(code), code.to_owned());
            assert!(err.is_retryable(), "{code} should be retryable");
        }
    }

    #[test]
    fn permanent_codes_are_not_retryable() {
        assert!(matches!(
            classify_code(Some("AccessDeniedException"), String::new()),
            BlocklistError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_code(Some("ResourceNotFoundException"), String::new()),
            BlocklistError::NotFound(_)
        ));
        assert!(matches!(
            classify_code(Some("ValidationException"), String::new()),
            BlocklistError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_code(None, String::new()),
            BlocklistError::Backend(_)
        ));
    }

    #[test]
    fn decodes_full_item() {
        let hash = ContentHash::of(b"x");
        let entry = DynamoBlocklistBackend::decode(&item(&[
            (ATTR_FILE_HASH, AttributeValue::S(hash.as_str().to_owned())),
            (ATTR_INSERTED_AT_MS, AttributeValue::N("1767225600123".into())),
            (ATTR_EXPIRES_AT, AttributeValue::N("1767229200".into())),
        ]))
        .unwrap();
        assert_eq!(entry.hash, hash);
        assert_eq!(entry.inserted_at.timestamp_millis(), 1_767_225_600_123);
        assert_eq!(entry.expires_at.map(|e| e.timestamp()), Some(1_767_229_200));
    }

    #[test]
    fn decodes_item_without_expiry() {
        let hash = ContentHash::of(b"x");
        let entry = DynamoBlocklistBackend::decode(&item(&[
            (ATTR_FILE_HASH, AttributeValue::S(hash.as_str().to_owned())),
            (ATTR_INSERTED_AT_MS, AttributeValue::N("0".into())),
        ]))
        .unwrap();
        assert!(entry.expires_at.is_none());
    }

    #[test]
    fn rejects_malformed_item() {
        let err = DynamoBlocklistBackend::decode(&item(&[(
            ATTR_FILE_HASH,
            AttributeValue::S("not-a-hash".into()),
        )]))
        .unwrap_err();
        assert!(matches!(err, BlocklistError::Serialization(_)));
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;
    use crate::table::create_table;

    fn test_config() -> DynamoConfig {
        DynamoConfig {
            table_name: std::env::var("DYNAMODB_TABLE")
                .unwrap_or_else(|_| "mediagate_blocklist_test".to_owned()),
            endpoint_url: Some(
                std::env::var("DYNAMODB_ENDPOINT")
                    .unwrap_or_else(|_| "http://localhost:8000".to_owned()),
            ),
            ..DynamoConfig::default()
        }
    }

    #[tokio::test]
    async fn backend_conformance() {
        let config = test_config();
        let backend = DynamoBlocklistBackend::new(&config).await;
        create_table(backend.client(), &config.table_name)
            .await
            .expect("table creation should succeed");
        create_table(backend.client(), &config.table_name)
            .await
            .expect("table creation should be idempotent");
        mediagate_blocklist::testing::run_blocklist_conformance_tests(&backend)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn missing_table_is_permanent() {
        let config = DynamoConfig {
            table_name: format!("missing-{}", uuid::Uuid::new_v4()),
            ..test_config()
        };
        let backend = DynamoBlocklistBackend::new(&config).await;
        let err = backend.get(&ContentHash::of(b"x")).await.unwrap_err();
        assert!(!err.is_retryable(), "unexpected error: {err}");
    }
}
