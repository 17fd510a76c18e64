// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Grok parsing of text records into top-level fields.
//!
//! The user names their own patterns in `GROK_PATTERNS` and combines them in
//! `LOGS_FORMAT`, for example:
//!
//! ```text
//! GROK_PATTERNS={"app_name":"cool app","my_message":".*"}
//! LOGS_FORMAT=%{app_name:my_app} : %{my_message:my_message}
//! ```
//!
//! Only aliased captures become fields. A captured value that is itself a
//! JSON object is kept as an object.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use grok::{Grok, Pattern};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::GrokConfig;
use crate::error::ConfigError;
use crate::logs::transformer::parse_json_object;

/// Name the whole `LOGS_FORMAT` expression is registered under.
const LOG_FORMAT_PATTERN: &str = "LOG_FORMAT";

#[derive(Clone)]
pub struct GrokParser {
    pattern: Arc<Pattern>,
    logs_format: String,
}

impl fmt::Debug for GrokParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrokParser")
            .field("logs_format", &self.logs_format)
            .finish_non_exhaustive()
    }
}

impl GrokParser {
    /// Registers the user patterns on top of the built-in grok library and
    /// compiles the logs format.
    pub fn new(config: &GrokConfig) -> Result<Self, ConfigError> {
        let patterns: BTreeMap<String, String> = serde_json::from_str(&config.patterns)
            .map_err(|e| ConfigError::Invalid(format!("GROK_PATTERNS must be a JSON object of strings: {e}")))?;

        let mut grok = Grok::with_patterns();
        for (name, regex) in &patterns {
            debug!("LOGS | Adding grok pattern {name}: {regex}");
            grok.insert_definition(name.as_str(), regex.as_str());
        }
        grok.insert_definition(LOG_FORMAT_PATTERN, config.logs_format.as_str());

        let pattern = grok
            .compile(&format!("%{{{LOG_FORMAT_PATTERN}}}"), true)
            .map_err(|e| {
                ConfigError::Invalid(format!(
                    "LOGS_FORMAT '{}' could not be compiled: {e}",
                    config.logs_format
                ))
            })?;

        Ok(GrokParser {
            pattern: Arc::new(pattern),
            logs_format: config.logs_format.clone(),
        })
    }

    #[must_use]
    pub fn logs_format(&self) -> &str {
        &self.logs_format
    }

    /// Fields captured from `text`. `None` when the format does not match
    /// or captures nothing.
    #[must_use]
    pub fn parse(&self, text: &str) -> Option<Map<String, Value>> {
        let matches = self.pattern.match_against(text)?;
        let fields: Map<String, Value> = matches
            .iter()
            .map(|(name, value)| {
                let value = parse_json_object(value).map_or_else(|| Value::from(value), Value::Object);
                (name.to_string(), value)
            })
            .collect();
        debug!("LOGS | Grok captured {} fields", fields.len());

        if fields.is_empty() {
            None
        } else {
            Some(fields)
        }
    }
}
