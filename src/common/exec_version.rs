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
use crate::common::status::ExchangeError;

/// Oldest block encoding this backend can still decode.
pub const MIN_BE_EXEC_VERSION: i32 = 0;
/// Newest block encoding this backend understands.
pub const MAX_BE_EXEC_VERSION: i32 = 8;

pub fn check_be_exec_version(be_exec_version: i32) -> Result<(), ExchangeError> {
    if (MIN_BE_EXEC_VERSION..=MAX_BE_EXEC_VERSION).contains(&be_exec_version) {
        return Ok(());
    }
    Err(ExchangeError::VersionMismatch {
        version: be_exec_version,
        min: MIN_BE_EXEC_VERSION,
        max: MAX_BE_EXEC_VERSION,
    })
}
