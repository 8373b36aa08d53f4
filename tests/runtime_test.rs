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
//! Integration tests for runtime components (config, query context, trackers, gates).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::common::{TestConfig, test_query_id};
use novarocks_exchange::common::types::UniqueId;
use novarocks_exchange::exec::pipeline::dependency::{BackpressureGate, Dependency};
use novarocks_exchange::exec::pipeline::exchange::{ExchangeSinkOptions, ExchangeSinkSender};
use novarocks_exchange::runtime::query_context::QueryContext;
use novarocks_exchange::runtime::runtime_state::RuntimeState;

mod common;

#[test]
fn test_runtime_config_loading() {
    let test_config = TestConfig::new().expect("Failed to create test config");
    let config = test_config.load_config().expect("Failed to load config");

    assert_eq!(config.exchange.queue_capacity_factor, 8);
    assert_eq!(config.exchange.broadcast_buffer_blocks_limit, 16);
    assert_eq!(config.exchange.min_http_brpc_size_bytes, 4096);
    assert_eq!(config.exchange.rpc_timeout_ms, 2000);
    assert_eq!(config.profile.level, 4);
    assert_eq!(config.effective_log_filter(), "debug");
}

#[test]
fn test_exchange_options_follow_config() {
    let test_config = TestConfig::new().expect("Failed to create test config");
    test_config.load_config().expect("Failed to load config");
    test_config.init_logging();

    let options = ExchangeSinkOptions::from_config();
    assert_eq!(options.queue_capacity_factor, 8);
    assert_eq!(options.min_http_brpc_size_bytes, 4096);
    assert!(options.transfer_large_data_by_brpc);
    assert!(options.ignore_eovercrowded);
}

#[test]
fn test_runtime_state_reads_profile_settings() {
    let test_config = TestConfig::new().expect("Failed to create test config");
    test_config.load_config().expect("Failed to load config");

    let query_ctx = QueryContext::new(test_query_id());
    let state = RuntimeState::new(Arc::clone(&query_ctx), UniqueId::new(7, 8));
    assert_eq!(state.profile_level(), 4);
    assert_eq!(state.rpc_verbose_profile_max_instance_count(), 3);
    assert_eq!(state.query_id(), test_query_id());
    assert_eq!(state.fragment_instance_id(), UniqueId::new(7, 8));
}

#[test]
fn test_sender_bytes_roll_up_to_fragment_tracker() {
    let query_ctx = QueryContext::new(UniqueId::new(5, 6));
    let state = RuntimeState::new(query_ctx, UniqueId::new(5, 9));
    let sender = ExchangeSinkSender::new(1, 0, 0, state.mem_tracker());

    sender.mem_tracker().consume(4096);
    assert_eq!(state.mem_tracker().current(), 4096);
    sender.mem_tracker().release(4096);
    assert_eq!(state.mem_tracker().current(), 0);
    assert_eq!(state.mem_tracker().peak(), 4096);
}

#[test]
fn test_query_cancel_notifies_observers_once() {
    let query_ctx = QueryContext::new(test_query_id());
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    query_ctx.add_cancel_observer(Arc::new(move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    }));

    query_ctx.cancel("exchange rpc failed");
    query_ctx.cancel("again");
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(query_ctx.cancel_requests(), 2);
    assert_eq!(query_ctx.cancel_reason().as_deref(), Some("exchange rpc failed"));
}

#[test]
fn test_dependency_wakes_waiter_on_set_ready() {
    let dep = Dependency::new_ready("exchange_sink_queue");
    let gate: Arc<dyn BackpressureGate> = dep.clone();
    gate.block();
    assert!(!dep.is_ready());

    let woken = Arc::new(AtomicUsize::new(0));
    let woken_clone = Arc::clone(&woken);
    dep.add_waiter(Arc::new(move || {
        woken_clone.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(woken.load(Ordering::SeqCst), 0);

    gate.set_ready();
    gate.set_ready();
    assert!(dep.is_ready());
    assert_eq!(woken.load(Ordering::SeqCst), 1);
}
