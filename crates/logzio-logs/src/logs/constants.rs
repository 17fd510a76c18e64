// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Logz.io listener limits and the fixed values stamped on every line.

/// Largest request body the listener accepts, before compression.
pub(crate) const MAX_BULK_SIZE_BYTES: usize = 10 * 1_024 * 1_024;

/// Lines of this size or larger are rejected by the listener, so they are
/// dropped before they can poison a whole bulk.
pub(crate) const MAX_LOG_SIZE_BYTES: usize = 500_000;

/// Value of the `type` field on every shipped line.
pub const SHIPPER_TYPE: &str = "logs-lambda-extension-rust";

/// Sent as the `logzio-shipper` header.
pub const SHIPPER_HEADER: &str = concat!("logs-lambda-extension/v", env!("CARGO_PKG_VERSION"), "/0,0");

/// Separator placed between lines inside a bulk.
pub const LINE_SEPARATOR: &str = "\n";

pub(crate) const FIELD_TIMESTAMP: &str = "@timestamp";
pub(crate) const FIELD_TYPE: &str = "type";
pub(crate) const FIELD_LOG_TYPE: &str = "lambda.log.type";
pub(crate) const FIELD_MESSAGE: &str = "message";
pub(crate) const FIELD_MESSAGE_NESTED: &str = "message_nested";
pub(crate) const FIELD_FUNCTION_NAME: &str = "lambda_function_name";
pub(crate) const FIELD_AWS_REGION: &str = "aws_region";

/// Prefix of the fields produced from a structured (mapping) record.
pub(crate) const FIELD_RECORD_PREFIX: &str = "lambda.log.";
