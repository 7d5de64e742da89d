//! Amazon DynamoDB persistence backend.
//!
//! The conditional insert is a `PutItem` with a `ConditionExpression`; a
//! `ConditionalCheckFailedException` means another caller holds the key. The
//! `expiration` attribute is epoch seconds, so it can double as the table's TTL
//! attribute, but expiry is always evaluated logically as well.
//!
//! ```rust,no_run
//! use lambda_idempotency::persistence::{DynamoDbStore, DynamoDbStoreConfig};
//!
//! # async fn example() {
//! let store = DynamoDbStore::from_env(DynamoDbStoreConfig::new("IdempotencyTable")).await;
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};

use super::{PersistenceStore, StoreSettings};
use crate::error::StoreError;
use crate::record::{DataRecord, RecordStatus};

/// A claim may only land on an absent or expired item. The in-progress
/// deadline never takes part.
const CLAIM_CONDITION: &str = "attribute_not_exists(#id) OR #expiry <= :now";

/// Table layout and client settings for [`DynamoDbStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamoDbStoreConfig {
    /// DynamoDB table name
    pub table_name: String,
    /// Partition key attribute
    pub key_attr: String,
    /// Sort key attribute. When set, the partition key holds a static value and
    /// the idempotency key goes into the sort key.
    pub sort_key_attr: Option<String>,
    /// Partition value used with a sort key; defaults to `idempotency#{namespace}`
    pub static_pk_value: Option<String>,
    /// Record expiry attribute (epoch seconds)
    pub expiry_attr: String,
    /// IN_PROGRESS deadline attribute (epoch milliseconds)
    pub in_progress_expiry_attr: String,
    /// Status attribute
    pub status_attr: String,
    /// Serialized response attribute
    pub data_attr: String,
    /// Payload fingerprint attribute
    pub validation_attr: String,
    /// AWS region override
    pub region: Option<String>,
    /// Endpoint override (e.g. DynamoDB Local)
    pub endpoint: Option<String>,
}

impl DynamoDbStoreConfig {
    /// Default attribute layout for the given table.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            key_attr: "id".to_string(),
            sort_key_attr: None,
            static_pk_value: None,
            expiry_attr: "expiration".to_string(),
            in_progress_expiry_attr: "in_progress_expiration".to_string(),
            status_attr: "status".to_string(),
            data_attr: "data".to_string(),
            validation_attr: "validation".to_string(),
            region: None,
            endpoint: None,
        }
    }

    /// Stores keys under a composite primary key.
    pub fn with_sort_key(mut self, sort_key_attr: impl Into<String>) -> Self {
        self.sort_key_attr = Some(sort_key_attr.into());
        self
    }

    fn partition_value(&self, namespace: &str) -> String {
        self.static_pk_value
            .clone()
            .unwrap_or_else(|| format!("idempotency#{}", namespace))
    }

    fn primary_key(&self, namespace: &str, key: &str) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        match &self.sort_key_attr {
            Some(sort_key_attr) => {
                item.insert(
                    self.key_attr.clone(),
                    AttributeValue::S(self.partition_value(namespace)),
                );
                item.insert(sort_key_attr.clone(), AttributeValue::S(key.to_string()));
            }
            None => {
                item.insert(self.key_attr.clone(), AttributeValue::S(key.to_string()));
            }
        }
        item
    }

    fn to_item(&self, namespace: &str, record: &DataRecord) -> HashMap<String, AttributeValue> {
        let mut item = self.primary_key(namespace, &record.key);
        item.insert(
            self.status_attr.clone(),
            AttributeValue::S(record.status.as_str().to_string()),
        );
        item.insert(
            self.expiry_attr.clone(),
            AttributeValue::N(record.expiry.to_string()),
        );
        if let Some(in_progress_expiry) = record.in_progress_expiry {
            item.insert(
                self.in_progress_expiry_attr.clone(),
                AttributeValue::N(in_progress_expiry.to_string()),
            );
        }
        if let Some(data) = &record.response_data {
            item.insert(self.data_attr.clone(), AttributeValue::S(data.clone()));
        }
        if let Some(validation) = &record.validation {
            item.insert(
                self.validation_attr.clone(),
                AttributeValue::S(validation.clone()),
            );
        }
        item
    }

    fn parse_item(&self, item: &HashMap<String, AttributeValue>) -> Result<DataRecord, StoreError> {
        let key_attr = self.sort_key_attr.as_ref().unwrap_or(&self.key_attr);
        let key = string_attr(item, key_attr)
            .ok_or_else(|| StoreError::backend(format!("Item is missing '{}'", key_attr)))?;
        let status = string_attr(item, &self.status_attr)
            .and_then(|value| RecordStatus::parse(&value))
            .ok_or_else(|| {
                StoreError::backend(format!("Item has no valid '{}'", self.status_attr))
            })?;
        let expiry = number_attr(item, &self.expiry_attr)?.ok_or_else(|| {
            StoreError::backend(format!("Item is missing '{}'", self.expiry_attr))
        })?;

        Ok(DataRecord {
            key,
            status,
            expiry,
            in_progress_expiry: number_attr(item, &self.in_progress_expiry_attr)?,
            response_data: string_attr(item, &self.data_attr),
            validation: string_attr(item, &self.validation_attr),
        })
    }
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).cloned()
}

fn number_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Result<Option<i64>, StoreError> {
    match item.get(name).and_then(|v| v.as_n().ok()) {
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|e| StoreError::backend_with_source(format!("Attribute '{}' is not an integer", name), e)),
        None => Ok(None),
    }
}

fn is_conditional_check_failed(err: &SdkError<PutItemError>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => {
            matches!(
                service_err.err(),
                PutItemError::ConditionalCheckFailedException(_)
            )
        }
        _ => false,
    }
}

/// DynamoDB-backed [`PersistenceStore`].
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
    config: DynamoDbStoreConfig,
    settings: StoreSettings,
}

impl std::fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbStore")
            .field("table_name", &self.config.table_name)
            .field("settings", &self.settings)
            .finish()
    }
}

impl DynamoDbStore {
    /// Creates a store from a pre-built client.
    pub fn from_client(client: Client, config: DynamoDbStoreConfig) -> Self {
        Self {
            client,
            config,
            settings: StoreSettings::default(),
        }
    }

    /// Creates a store from shared AWS configuration, applying the region and
    /// endpoint overrides of `config`.
    pub fn from_conf(sdk_config: &aws_config::SdkConfig, config: DynamoDbStoreConfig) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);
        if let Some(region) = &config.region {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        Self::from_client(Client::from_conf(builder.build()), config)
    }

    /// Creates a store using the default AWS credential and region chain.
    pub async fn from_env(config: DynamoDbStoreConfig) -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::from_conf(&sdk_config, config)
    }

    /// The table layout in use.
    pub fn config(&self) -> &DynamoDbStoreConfig {
        &self.config
    }

    fn primary_key(&self, key: &str) -> HashMap<String, AttributeValue> {
        self.config.primary_key(&self.settings.namespace, key)
    }
}

#[async_trait]
impl PersistenceStore for DynamoDbStore {
    fn configure(&mut self, settings: &StoreSettings) {
        self.settings = settings.clone();
    }

    async fn save_in_progress(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
        deadline_hint: Option<Duration>,
    ) -> Result<(), StoreError> {
        let record = self
            .settings
            .in_progress_record(key, fingerprint, now, deadline_hint);

        let result = self
            .client
            .put_item()
            .table_name(&self.config.table_name)
            .set_item(Some(self.config.to_item(&self.settings.namespace, &record)))
            .condition_expression(CLAIM_CONDITION)
            .expression_attribute_names("#id", &self.config.key_attr)
            .expression_attribute_names("#expiry", &self.config.expiry_attr)
            .expression_attribute_values(":now", AttributeValue::N(now.timestamp().to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_conditional_check_failed(&e) => Err(StoreError::AlreadyExists),
            Err(e) => Err(StoreError::backend_with_source(
                format!("DynamoDB PutItem failed: {}", DisplayErrorContext(&e)),
                e,
            )),
        }
    }

    async fn get_record(&self, key: &str) -> Result<DataRecord, StoreError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.config.table_name)
            .set_key(Some(self.primary_key(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| {
                StoreError::backend_with_source(
                    format!("DynamoDB GetItem failed: {}", DisplayErrorContext(&e)),
                    e,
                )
            })?;

        match response.item() {
            Some(item) => self.config.parse_item(item),
            None => Err(StoreError::ItemNotFound),
        }
    }

    async fn save_success(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        response_data: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = self
            .settings
            .completed_record(key, fingerprint, response_data, now);

        self.client
            .put_item()
            .table_name(&self.config.table_name)
            .set_item(Some(self.config.to_item(&self.settings.namespace, &record)))
            .send()
            .await
            .map_err(|e| {
                StoreError::backend_with_source(
                    format!("DynamoDB PutItem failed: {}", DisplayErrorContext(&e)),
                    e,
                )
            })?;
        Ok(())
    }

    async fn delete_record(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.config.table_name)
            .set_key(Some(self.primary_key(key)))
            .send()
            .await
            .map_err(|e| {
                StoreError::backend_with_source(
                    format!("DynamoDB DeleteItem failed: {}", DisplayErrorContext(&e)),
                    e,
                )
            })?;
        Ok(())
    }
}
