use std::time::Duration;

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{BuildError, SdkError};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, KeySchemaElement, KeyType, ProvisionedThroughput, ScalarAttributeType,
    TableStatus, TimeToLiveSpecification,
};
use tracing::{debug, info};

use mediagate_blocklist::BlocklistError;

use crate::store::classify;

/// Partition key: hex SHA-256 of the file.
pub(crate) const ATTR_FILE_HASH: &str = "file_hash";
/// Insertion time in epoch milliseconds.
pub(crate) const ATTR_INSERTED_AT_MS: &str = "inserted_at_ms";
/// Expiry in epoch seconds; the table's TTL attribute.
pub(crate) const ATTR_EXPIRES_AT: &str = "expires_at";

const ACTIVE_POLLS: u32 = 20;
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn invalid(e: BuildError) -> BlocklistError {
    BlocklistError::InvalidRequest(e.to_string())
}

/// Create the blocklist table and enable native TTL on `expires_at`.
///
/// The table is keyed by `file_hash` (String). Calling this against an
/// existing table, or one whose TTL is already enabled, is not an error.
///
/// This is intended for tests and local development. In production you would
/// typically provision the table via Infrastructure-as-Code tooling.
pub async fn create_table(client: &Client, table_name: &str) -> Result<(), BlocklistError> {
    let result = client
        .create_table()
        .table_name(table_name)
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(ATTR_FILE_HASH)
                .key_type(KeyType::Hash)
                .build()
                .map_err(invalid)?,
        )
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(ATTR_FILE_HASH)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .map_err(invalid)?,
        )
        .provisioned_throughput(
            ProvisionedThroughput::builder()
                .read_capacity_units(5)
                .write_capacity_units(5)
                .build()
                .map_err(invalid)?,
        )
        .send()
        .await;

    match result {
        Ok(_) => info!(table = table_name, "created blocklist table"),
        Err(SdkError::ServiceError(ctx)) if ctx.err().is_resource_in_use_exception() => {
            debug!(table = table_name, "blocklist table already exists");
        }
        Err(err) => return Err(classify(err)),
    }

    wait_until_active(client, table_name).await?;
    enable_ttl(client, table_name).await
}

async fn wait_until_active(client: &Client, table_name: &str) -> Result<(), BlocklistError> {
    for _ in 0..ACTIVE_POLLS {
        let output = client
            .describe_table()
            .table_name(table_name)
            .send()
            .await
            .map_err(classify)?;
        let status = output.table().and_then(|t| t.table_status());
        if matches!(status, Some(TableStatus::Active)) {
            return Ok(());
        }
        tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
    }
    Err(BlocklistError::Unavailable(format!(
        "table {table_name} did not become active"
    )))
}

async fn enable_ttl(client: &Client, table_name: &str) -> Result<(), BlocklistError> {
    let spec = TimeToLiveSpecification::builder()
        .attribute_name(ATTR_EXPIRES_AT)
        .enabled(true)
        .build()
        .map_err(invalid)?;

    let result = client
        .update_time_to_live()
        .table_name(table_name)
        .time_to_live_specification(spec)
        .send()
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) => {
            // Re-enabling TTL is reported as a validation error.
            let already_enabled = matches!(
                &err,
                SdkError::ServiceError(ctx)
                    if ctx.err().meta().message().is_some_and(|m| m.contains("already enabled"))
            );
            if already_enabled {
                Ok(())
            } else {
                Err(classify(err))
            }
        }
    }
}
