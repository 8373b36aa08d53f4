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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tempfile::TempDir;

use novarocks_exchange::common::status::{ExchangeError, PStatus};
use novarocks_exchange::common::types::{InstanceLoId, NetAddress, UniqueId};
use novarocks_exchange::exec::pipeline::dependency::BackpressureGate;
use novarocks_exchange::exec::pipeline::exchange::{
    ChannelFinishedListener, ExchangeChannel, ExchangeSinkBuffer, ExchangeSinkOptions,
    ExchangeSinkSender,
};
use novarocks_exchange::novarocks_config;
use novarocks_exchange::novarocks_logging;
use novarocks_exchange::runtime::query_context::QueryContext;
use novarocks_exchange::runtime::runtime_state::RuntimeState;
use novarocks_exchange::service::exchange_transport::{
    ExchangeSendClosure, ExchangeTransport, TransmitMode,
};
use novarocks_exchange::service::proto::{
    PBlock, PColumnMeta, PTransmitDataParams, PTransmitDataResult,
};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks.toml");

        let config_content = r#"
log_level = "debug"

[exchange]
queue_capacity_factor = 8
broadcast_buffer_size_limit_bytes = 1048576
broadcast_buffer_blocks_limit = 16
transfer_large_data_by_brpc = true
min_http_brpc_size_bytes = 4096
rpc_timeout_ms = 2000
io_threads = 2

[profile]
level = 4
rpc_verbose_profile_max_instance_count = 3
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static novarocks_config::NovaRocksConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Generate a test query ID.
pub fn test_query_id() -> UniqueId {
    UniqueId {
        hi: 1234567890,
        lo: 9876543210,
    }
}

pub const BE_EXEC_VERSION: i32 = 3;

pub fn test_block(len: usize) -> PBlock {
    versioned_block(len, BE_EXEC_VERSION)
}

pub fn versioned_block(len: usize, be_exec_version: i32) -> PBlock {
    PBlock::new(
        be_exec_version,
        vec![PColumnMeta {
            name: "c0".to_string(),
            type_name: "BIGINT".to_string(),
        }],
        Bytes::from(vec![0xABu8; len]),
    )
}

/// What the transport saw for one submission.
#[derive(Clone, Debug)]
pub struct Submission {
    pub mode: TransmitMode,
    pub dest: NetAddress,
    pub dest_ins_id: InstanceLoId,
    pub packet_seq: i64,
    pub eos: bool,
    pub sender_id: i32,
    pub be_number: i32,
    pub node_id: i32,
    pub block_len: Option<usize>,
    pub block_ptr: Option<usize>,
    pub exec_status: Option<PStatus>,
    pub timeout_ms: u64,
}

impl Submission {
    fn capture(mode: TransmitMode, request: &PTransmitDataParams, dest: &NetAddress, timeout_ms: u64) -> Self {
        Self {
            mode,
            dest: dest.clone(),
            dest_ins_id: request.finst_id.lo,
            packet_seq: request.packet_seq,
            eos: request.eos,
            sender_id: request.sender_id,
            be_number: request.be_number,
            node_id: request.node_id,
            block_len: request.block().map(|b| b.column_values().len()),
            block_ptr: request.block().map(|b| b.column_values().as_ptr() as usize),
            exec_status: request.exec_status.clone(),
            timeout_ms,
        }
    }
}

/// Transport that parks closures until the test completes them.
///
/// Also checks that no destination ever has two requests in flight.
#[derive(Default)]
pub struct RecordingTransport {
    submissions: Mutex<Vec<Submission>>,
    pending: Mutex<HashMap<InstanceLoId, Vec<ExchangeSendClosure>>>,
    in_flight: Mutex<HashMap<InstanceLoId, usize>>,
    overlap_violations: AtomicUsize,
    reject_submit: AtomicBool,
    cancel_calls: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_next_submits(&self, reject: bool) {
        self.reject_submit.store(reject, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submissions_for(&self, dest_ins_id: InstanceLoId) -> Vec<Submission> {
        self.submissions()
            .into_iter()
            .filter(|s| s.dest_ins_id == dest_ins_id)
            .collect()
    }

    pub fn pending_count(&self, dest_ins_id: InstanceLoId) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(&dest_ins_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn overlap_violations(&self) -> usize {
        self.overlap_violations.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Completes the oldest pending request of `dest_ins_id`. Returns false if none was pending.
    pub fn complete_next(
        &self,
        dest_ins_id: InstanceLoId,
        outcome: Result<PTransmitDataResult, String>,
    ) -> bool {
        let closure = {
            let mut pending = self.pending.lock().unwrap();
            match pending.get_mut(&dest_ins_id) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => return false,
            }
        };
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let entry = in_flight.entry(dest_ins_id).or_insert(0);
            *entry = entry.saturating_sub(1);
        }
        closure.complete(outcome);
        true
    }

    pub fn complete_ok(&self, dest_ins_id: InstanceLoId) -> bool {
        self.complete_next(dest_ins_id, Ok(PTransmitDataResult::ok()))
    }

    /// Completes with OK until `dest_ins_id` has nothing in flight.
    pub fn drain(&self, dest_ins_id: InstanceLoId) -> usize {
        let mut completed = 0;
        while self.complete_ok(dest_ins_id) {
            completed += 1;
        }
        completed
    }

    pub fn take_pending(&self, dest_ins_id: InstanceLoId) -> Vec<ExchangeSendClosure> {
        self.pending
            .lock()
            .unwrap()
            .remove(&dest_ins_id)
            .unwrap_or_default()
    }
}

impl ExchangeTransport for RecordingTransport {
    fn submit(
        &self,
        mode: TransmitMode,
        request: &PTransmitDataParams,
        closure: ExchangeSendClosure,
        dest: &NetAddress,
    ) -> Result<(), ExchangeError> {
        if self.reject_submit.load(Ordering::SeqCst) {
            return Err(ExchangeError::transport("channel to backend is broken"));
        }
        let dest_ins_id = request.finst_id.lo;
        self.submissions.lock().unwrap().push(Submission::capture(
            mode,
            request,
            dest,
            closure.options().timeout_ms,
        ));
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let entry = in_flight.entry(dest_ins_id).or_insert(0);
            if *entry > 0 {
                self.overlap_violations.fetch_add(1, Ordering::SeqCst);
            }
            *entry += 1;
        }
        self.pending
            .lock()
            .unwrap()
            .entry(dest_ins_id)
            .or_default()
            .push(closure);
        Ok(())
    }

    fn cancel_pending(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transport that answers every request from inside `submit`.
#[derive(Default)]
pub struct InlineTransport {
    submissions: Mutex<Vec<Submission>>,
}

impl InlineTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }
}

impl ExchangeTransport for InlineTransport {
    fn submit(
        &self,
        mode: TransmitMode,
        request: &PTransmitDataParams,
        closure: ExchangeSendClosure,
        dest: &NetAddress,
    ) -> Result<(), ExchangeError> {
        self.submissions.lock().unwrap().push(Submission::capture(
            mode,
            request,
            dest,
            closure.options().timeout_ms,
        ));
        closure.complete(Ok(PTransmitDataResult::ok()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingGate {
    blocks: AtomicUsize,
    readies: AtomicUsize,
    blocked: AtomicBool,
}

impl RecordingGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn block_calls(&self) -> usize {
        self.blocks.load(Ordering::SeqCst)
    }

    pub fn ready_calls(&self) -> usize {
        self.readies.load(Ordering::SeqCst)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }
}

impl BackpressureGate for RecordingGate {
    fn block(&self) {
        self.blocks.fetch_add(1, Ordering::SeqCst);
        self.blocked.store(true, Ordering::SeqCst);
    }

    fn set_ready(&self) {
        self.readies.fetch_add(1, Ordering::SeqCst);
        self.blocked.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingListener {
    finished: Mutex<Vec<InstanceLoId>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn finished(&self) -> Vec<InstanceLoId> {
        self.finished.lock().unwrap().clone()
    }
}

impl ChannelFinishedListener for RecordingListener {
    fn on_channel_finished(&self, dest_ins_id: InstanceLoId) {
        self.finished.lock().unwrap().push(dest_ins_id);
    }
}

pub fn test_options(queue_capacity_factor: usize) -> ExchangeSinkOptions {
    ExchangeSinkOptions {
        queue_capacity_factor,
        transfer_large_data_by_brpc: true,
        min_http_brpc_size_bytes: 1 << 20,
        ignore_eovercrowded: true,
    }
}

pub const DEST_NODE_ID: i32 = 5;
pub const NODE_ID: i32 = 4;

/// One buffer with its senders, their gates/listeners and a route to every destination.
pub struct Harness {
    pub query_ctx: Arc<QueryContext>,
    pub state: RuntimeState,
    pub buffer: Arc<ExchangeSinkBuffer>,
    pub senders: Vec<Arc<ExchangeSinkSender>>,
    pub gates: Vec<Arc<RecordingGate>>,
    pub listeners: Vec<Arc<RecordingListener>>,
    pub dests: Vec<InstanceLoId>,
}

impl Harness {
    pub fn new(
        num_senders: usize,
        dests: &[InstanceLoId],
        options: ExchangeSinkOptions,
        transport: Arc<dyn ExchangeTransport>,
    ) -> Self {
        Self::with_state(num_senders, dests, options, transport, |state| state)
    }

    pub fn with_state(
        num_senders: usize,
        dests: &[InstanceLoId],
        options: ExchangeSinkOptions,
        transport: Arc<dyn ExchangeTransport>,
        customize: impl FnOnce(RuntimeState) -> RuntimeState,
    ) -> Self {
        let query_id = test_query_id();
        let query_ctx = QueryContext::new(query_id);
        let state = customize(RuntimeState::new(
            Arc::clone(&query_ctx),
            UniqueId::new(query_id.hi, 1),
        ));
        let sender_ins_ids: Vec<InstanceLoId> = (0..num_senders).map(|i| 100 + i as i64).collect();
        let buffer = ExchangeSinkBuffer::with_options(
            query_id,
            DEST_NODE_ID,
            NODE_ID,
            &state,
            &sender_ins_ids,
            transport,
            options,
        );
        let mut senders = Vec::new();
        let mut gates = Vec::new();
        let mut listeners = Vec::new();
        for (idx, ins_id) in sender_ins_ids.iter().enumerate() {
            let sender = ExchangeSinkSender::new(*ins_id, idx as i32, 10 + idx as i32, state.mem_tracker());
            let gate = RecordingGate::new();
            let listener = RecordingListener::new();
            let listener_weak = Arc::downgrade(&listener);
            buffer.set_dependency(*ins_id, gate.clone(), listener_weak);
            senders.push(sender);
            gates.push(gate);
            listeners.push(listener);
        }
        for dest in dests {
            buffer.register_destination(UniqueId::new(query_id.hi, *dest));
        }
        Self {
            query_ctx,
            state,
            buffer,
            senders,
            gates,
            listeners,
            dests: dests.to_vec(),
        }
    }

    pub fn channel(&self, sender_idx: usize, dest: InstanceLoId) -> Arc<ExchangeChannel> {
        ExchangeChannel::with_rpc_timeout_ms(
            Arc::clone(&self.senders[sender_idx]),
            UniqueId::new(test_query_id().hi, dest),
            NetAddress::new(format!("be-{dest}"), 8060),
            3000,
        )
    }

    pub fn total_block_calls(&self) -> Vec<usize> {
        self.gates.iter().map(|g| g.block_calls()).collect()
    }

    pub fn total_ready_calls(&self) -> Vec<usize> {
        self.gates.iter().map(|g| g.ready_calls()).collect()
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
