// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::network::{CloseReason, StateKind};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // connection level errors
    #[error("network handler closed: {0}")]
    Closed(CloseReason),

    #[error("not connected: handler is {0}, call resume_connection first")]
    NotConnected(StateKind),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("key exchange failed: {0}")]
    Handshake(String),

    // request level errors
    #[error("request {command} (seq {sequence}) got no response after {attempts} attempt(s)")]
    Timeout {
        command: String,
        sequence: u32,
        attempts: u32,
    },

    // frame level errors, never escalate to the connection
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("processor {processor} failed on {input}: {message}")]
    ProcessorFailed {
        processor: String,
        input: String,
        message: String,
    },

    // general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),
}

impl AppError {
    /// The peer did not answer in time, the connection may still be usable.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout { .. })
    }

    /// The handler is closed and will never carry traffic again.
    pub fn is_closed(&self) -> bool {
        matches!(self, AppError::Closed(_))
    }

    /// Errors that mean the connection itself is unusable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Closed(_) | AppError::Transport(_) | AppError::Handshake(_) | AppError::IoError(_)
        )
    }
}
