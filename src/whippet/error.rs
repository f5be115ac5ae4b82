/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use thiserror::Error;

pub type KlfmResult<T> = std::result::Result<T, KlfmError>;

#[derive(Debug, Error)]
pub enum KlfmError {
    #[error("{0}")]
    Generic(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Graph invariant violation: {0}")]
    Graph(String),

    #[error("I/O Error: {0}")]
    IO(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JSON(#[from] serde_json::Error),
}

impl KlfmError {
    pub fn new(msg: &str) -> Self {
        Self::Generic(msg.to_owned())
    }
    pub fn err_none() -> Self {
        Self::Generic("Unexpectedly empty Option encountered.".to_owned())
    }
}

impl From<String> for KlfmError {
    fn from(str: String) -> Self {
        KlfmError::Generic(str)
    }
}

impl From<&str> for KlfmError {
    fn from(str: &str) -> Self {
        KlfmError::Generic(str.to_owned())
    }
}
