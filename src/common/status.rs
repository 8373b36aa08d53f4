// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Status and error types shared by the exchange sink path.
//!
//! `PStatus` mirrors the application-level status embedded in RPC responses,
//! while `ExchangeError` is what enqueue/dispatch surface to their callers.

use std::fmt;

use thiserror::Error;

use crate::common::types::InstanceLoId;

/// Status codes carried in `PStatus.status_code`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    RuntimeError,
    InternalError,
    Timeout,
    EndOfFile,
    Unknown(i32),
}

impl StatusCode {
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            4 => StatusCode::RuntimeError,
            6 => StatusCode::InternalError,
            8 => StatusCode::Timeout,
            30 => StatusCode::EndOfFile,
            other => StatusCode::Unknown(other),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Cancelled => 1,
            StatusCode::RuntimeError => 4,
            StatusCode::InternalError => 6,
            StatusCode::Timeout => 8,
            StatusCode::EndOfFile => 30,
            StatusCode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Ok => write!(f, "OK"),
            StatusCode::Cancelled => write!(f, "CANCELLED"),
            StatusCode::RuntimeError => write!(f, "RUNTIME_ERROR"),
            StatusCode::InternalError => write!(f, "INTERNAL_ERROR"),
            StatusCode::Timeout => write!(f, "TIMEOUT"),
            StatusCode::EndOfFile => write!(f, "END_OF_FILE"),
            StatusCode::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

/// Application-level status as transported inside RPC messages.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PStatus {
    pub status_code: i32,
    pub error_msgs: Vec<String>,
}

impl PStatus {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_code(code: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status_code: code.as_i32(),
            error_msgs: vec![msg.into()],
        }
    }

    pub fn end_of_file(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::EndOfFile, msg)
    }

    pub fn code(&self) -> StatusCode {
        StatusCode::from_i32(self.status_code)
    }

    pub fn is_ok(&self) -> bool {
        self.code() == StatusCode::Ok
    }

    pub fn is_end_of_file(&self) -> bool {
        self.code() == StatusCode::EndOfFile
    }
}

impl fmt::Display for PStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error_msgs.is_empty() {
            write!(f, "[{}]", self.code())
        } else {
            write!(f, "[{}]{}", self.code(), self.error_msgs.join("; "))
        }
    }
}

/// Errors surfaced by the exchange sink buffer.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum ExchangeError {
    /// Enqueue referenced a destination that never went through registration.
    #[error("fragment_instance_id {finst} not do register_sink")]
    NotRegistered { finst: String },

    /// The receiver already finished; the caller should stop producing for it.
    #[error("receiver eof")]
    EndOfStream,

    #[error("be exec version {version} is not in range [{min}, {max}]")]
    VersionMismatch { version: i32, min: i32, max: i32 },

    #[error("exchange rpc failed: {0}")]
    TransportFailure(String),

    /// Buffer bookkeeping is corrupted; not recoverable.
    #[error("exchange buffer invariant violated: instance {instance_id}: {message}")]
    InvariantViolation {
        instance_id: InstanceLoId,
        message: String,
    },
}

impl ExchangeError {
    pub fn transport(msg: impl Into<String>) -> Self {
        ExchangeError::TransportFailure(msg.into())
    }

    pub fn invariant(instance_id: InstanceLoId, message: impl Into<String>) -> Self {
        ExchangeError::InvariantViolation {
            instance_id,
            message: message.into(),
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ExchangeError::EndOfStream)
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_end_of_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::{ExchangeError, PStatus, StatusCode};

    #[test]
    fn status_code_round_trips_known_and_unknown_codes() {
        for code in [
            StatusCode::Ok,
            StatusCode::Cancelled,
            StatusCode::EndOfFile,
            StatusCode::Unknown(77),
        ] {
            assert_eq!(StatusCode::from_i32(code.as_i32()), code);
        }
    }

    #[test]
    fn pstatus_classifies_eof_separately_from_errors() {
        let eof = PStatus::end_of_file("receiver finished");
        assert!(eof.is_end_of_file());
        assert!(!eof.is_ok());
        assert!(PStatus::ok().is_ok());
        assert_eq!(eof.to_string(), "[END_OF_FILE]receiver finished");
    }

    #[test]
    fn end_of_stream_is_the_only_recoverable_error() {
        assert!(!ExchangeError::EndOfStream.is_fatal());
        assert!(ExchangeError::transport("boom").is_fatal());
        assert!(
            ExchangeError::VersionMismatch {
                version: 99,
                min: 0,
                max: 8
            }
            .is_fatal()
        );
    }
}
