// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of Lambda log records into Logz.io JSON lines.
//!
//! Every line carries `@timestamp`, the shipper `type` and the Lambda record
//! type. A text record becomes `message` (or `message_nested` when the text
//! is itself a JSON object), unless a grok format is configured and matches
//! it, in which case the captured fields take its place. A structured
//! record is flattened one level into
//! `lambda.log.<key>` fields. Output keys are serialized in sorted order, so
//! transforming the same record twice yields the same bytes.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::logs::constants::{
    FIELD_AWS_REGION, FIELD_FUNCTION_NAME, FIELD_LOG_TYPE, FIELD_MESSAGE, FIELD_MESSAGE_NESTED,
    FIELD_RECORD_PREFIX, FIELD_TIMESTAMP, FIELD_TYPE, SHIPPER_TYPE,
};
use crate::logs::grok::GrokParser;
use crate::logs::record::{LogRecord, Payload};

#[derive(Debug, Clone, Default)]
pub struct Transformer {
    custom_fields: BTreeMap<String, String>,
    flatten_nested_message: bool,
    function_name: Option<String>,
    aws_region: Option<String>,
    grok: Option<GrokParser>,
}

impl Transformer {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Transformer {
            custom_fields: config.custom_fields.clone(),
            flatten_nested_message: config.flatten_nested_message,
            function_name: config.function_name.clone(),
            aws_region: config.aws_region.clone(),
            grok: config.grok.as_ref().and_then(|grok| match GrokParser::new(grok) {
                Ok(parser) => {
                    info!("LOGS | Parsing text records with logs format {}", parser.logs_format());
                    Some(parser)
                }
                Err(e) => {
                    error!("LOGS | {e}. Text records are sent as plain messages");
                    None
                }
            }),
        }
    }

    /// Serializes `record` as one JSON line followed by `separator`.
    ///
    /// Returns `None` when the record must not be shipped: a whitespace-only
    /// keep-alive line, or a record missing one of its required fields.
    #[must_use]
    pub fn transform(&self, record: &LogRecord, separator: &str) -> Option<String> {
        let Some(payload) = &record.payload else {
            warn!("LOGS | Dropping malformed record: missing or invalid record field");
            return None;
        };
        if payload.is_placeholder() {
            debug!("LOGS | Dropping new line log");
            return None;
        }
        let Some(timestamp) = &record.timestamp else {
            warn!("LOGS | Dropping malformed record: missing time field");
            return None;
        };
        let Some(source_type) = &record.source_type else {
            warn!("LOGS | Dropping malformed record: missing type field");
            return None;
        };

        let mut line = Map::new();
        line.insert(FIELD_TIMESTAMP.to_string(), timestamp.clone());
        line.insert(FIELD_TYPE.to_string(), Value::from(SHIPPER_TYPE));
        line.insert(FIELD_LOG_TYPE.to_string(), Value::from(source_type.as_str()));

        match payload {
            Payload::Text(text) => self.insert_text(&mut line, text),
            Payload::Fields(fields) => {
                for (key, value) in fields {
                    line.insert(format!("{FIELD_RECORD_PREFIX}{key}"), value.clone());
                }
            }
        }

        if let Some(name) = &self.function_name {
            line.insert(FIELD_FUNCTION_NAME.to_string(), Value::from(name.as_str()));
        }
        if let Some(region) = &self.aws_region {
            line.insert(FIELD_AWS_REGION.to_string(), Value::from(region.as_str()));
        }
        for (key, value) in &self.custom_fields {
            line.entry(key.as_str())
                .or_insert_with(|| Value::from(value.as_str()));
        }

        match serde_json::to_string(&line) {
            Ok(mut serialized) => {
                serialized.push_str(separator);
                Some(serialized)
            }
            Err(e) => {
                warn!("LOGS | Dropping record that could not be serialized: {e}");
                None
            }
        }
    }

    fn insert_text(&self, line: &mut Map<String, Value>, text: &str) {
        if let Some(grok) = &self.grok {
            if let Some(fields) = grok.parse(text) {
                for (key, value) in fields {
                    line.entry(key).or_insert(value);
                }
                return;
            }
            debug!("LOGS | Record does not match the logs format, sending it as a message");
        }

        let Some(nested) = parse_json_object(text) else {
            line.insert(FIELD_MESSAGE.to_string(), Value::from(text));
            return;
        };

        if self.flatten_nested_message {
            for (key, value) in nested {
                line.entry(key).or_insert(value);
            }
        } else {
            line.insert(FIELD_MESSAGE_NESTED.to_string(), Value::Object(nested));
        }
    }
}

pub(crate) fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}
