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
use crate::novarocks_config::config as novarocks_app_config;

pub(crate) fn exchange_queue_capacity_factor() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.exchange.queue_capacity_factor)
        .unwrap_or(64)
}

pub(crate) fn exchange_broadcast_buffer_size_limit_bytes() -> i64 {
    novarocks_app_config()
        .ok()
        .map(|c| c.exchange.broadcast_buffer_size_limit_bytes)
        .unwrap_or(20 * 1024 * 1024)
}

pub(crate) fn exchange_broadcast_buffer_blocks_limit() -> i64 {
    novarocks_app_config()
        .ok()
        .map(|c| c.exchange.broadcast_buffer_blocks_limit)
        .unwrap_or(32)
}

pub(crate) fn exchange_transfer_large_data_by_brpc() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.exchange.transfer_large_data_by_brpc)
        .unwrap_or(true)
}

pub(crate) fn exchange_min_http_brpc_size_bytes() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.exchange.min_http_brpc_size_bytes)
        .unwrap_or(1usize << 31)
}

pub(crate) fn exchange_ignore_eovercrowded() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.exchange.ignore_eovercrowded)
        .unwrap_or(true)
}

pub(crate) fn exchange_rpc_timeout_ms() -> u64 {
    novarocks_app_config()
        .ok()
        .map(|c| c.exchange.rpc_timeout_ms)
        .unwrap_or(60_000)
}

pub(crate) fn exchange_io_threads() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.exchange.io_threads)
        .unwrap_or(4)
}

pub(crate) fn profile_level() -> i32 {
    novarocks_app_config()
        .ok()
        .map(|c| c.profile.level)
        .unwrap_or(1)
}

pub(crate) fn rpc_verbose_profile_max_instance_count() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.profile.rpc_verbose_profile_max_instance_count)
        .unwrap_or(5)
}
