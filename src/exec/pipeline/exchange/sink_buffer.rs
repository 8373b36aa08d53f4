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
//! Outbound exchange sink buffer.
//!
//! Responsibilities:
//! - Queues unicast and broadcast blocks per destination fragment instance.
//! - Keeps exactly one transmit RPC in flight per destination and numbers
//!   packets `0, 1, 2, ...` in wire order.
//! - Blocks every sender's backpressure gate while queued unicast units exceed
//!   `queue_capacity_factor * destinations`, and releases them when drained.
//! - Closes destinations on normal end of stream, on receiver EOF, or when any
//!   RPC fails, and tells each sender exactly once.
//! - Aggregates RPC latency for the operator profile.
//!
//! Each destination moves through `Idle -> Sending -> Idle | TurnedOff`.
//! Enqueue claims `Sending` on an idle destination and dispatches after
//! releasing the destination lock. Every completion dispatches the next unit,
//! so there is no background poller.
//!
//! Lock order: destination lock, then gate lock, then the sender table.
//!
//! Key exported interfaces:
//! - Types: `ExchangeSinkBuffer`, `TransmitInfo`, `BroadcastTransmitInfo`, `ExchangeSinkOptions`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use crate::common::config;
use crate::common::exec_version::check_be_exec_version;
use crate::common::status::{ExchangeError, PStatus};
use crate::common::types::{InstanceLoId, PlanNodeId, UniqueId};
use crate::exec::pipeline::dependency::BackpressureGate;
use crate::exec::pipeline::exchange::broadcast::BroadcastPBlockHolder;
use crate::exec::pipeline::exchange::channel::{ChannelFinishedListener, ExchangeChannel};
use crate::exec::pipeline::exchange::rpc_stats::{RpcInstanceStatistics, max_min_sum_time};
use crate::novarocks_logging::{debug, info, warn};
use crate::runtime::mem_tracker::TrackedBytes;
use crate::runtime::profile::{RuntimeProfile, TUnit, pretty_print};
use crate::runtime::query_context::QueryContext;
use crate::runtime::runtime_state::RuntimeState;
use crate::service::exchange_transport::{
    ExchangeSendClosure, ExchangeTransport, RpcOptions, TransmitMode, enable_http_send_block,
    monotonic_now_ns,
};
use crate::service::proto::{BlockSlot, PBlock, PTransmitDataParams, PTransmitDataResult};

/// A block bound for exactly one destination.
#[derive(Debug)]
pub struct TransmitInfo {
    pub channel: Arc<ExchangeChannel>,
    pub block: Option<Box<PBlock>>,
    pub eos: bool,
    /// Forwarded to the receiver when not OK.
    pub exec_status: PStatus,
}

impl TransmitInfo {
    pub fn new(channel: Arc<ExchangeChannel>, block: Option<PBlock>, eos: bool) -> Self {
        Self {
            channel,
            block: block.map(Box::new),
            eos,
            exec_status: PStatus::ok(),
        }
    }

    pub fn with_exec_status(mut self, status: PStatus) -> Self {
        self.exec_status = status;
        self
    }
}

/// A shared block queued to one of several destinations.
#[derive(Debug, Clone)]
pub struct BroadcastTransmitInfo {
    pub channel: Arc<ExchangeChannel>,
    pub block_holder: Arc<BroadcastPBlockHolder>,
    pub eos: bool,
}

impl BroadcastTransmitInfo {
    pub fn new(
        channel: Arc<ExchangeChannel>,
        block_holder: Arc<BroadcastPBlockHolder>,
        eos: bool,
    ) -> Self {
        Self {
            channel,
            block_holder,
            eos,
        }
    }
}

/// Tunables read once when the buffer is created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExchangeSinkOptions {
    pub queue_capacity_factor: usize,
    pub transfer_large_data_by_brpc: bool,
    pub min_http_brpc_size_bytes: usize,
    pub ignore_eovercrowded: bool,
}

impl ExchangeSinkOptions {
    pub fn from_config() -> Self {
        Self {
            queue_capacity_factor: config::exchange_queue_capacity_factor(),
            transfer_large_data_by_brpc: config::exchange_transfer_large_data_by_brpc(),
            min_http_brpc_size_bytes: config::exchange_min_http_brpc_size_bytes(),
            ignore_eovercrowded: config::exchange_ignore_eovercrowded(),
        }
    }
}

impl Default for ExchangeSinkOptions {
    fn default() -> Self {
        Self::from_config()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ChannelPhase {
    Idle,
    Sending,
    TurnedOff,
}

struct QueuedUnicast {
    info: TransmitInfo,
    _accounting: Option<TrackedBytes>,
}

enum OutgoingUnit {
    Unicast(QueuedUnicast),
    Broadcast(BroadcastTransmitInfo),
}

impl OutgoingUnit {
    fn channel(&self) -> &Arc<ExchangeChannel> {
        match self {
            OutgoingUnit::Unicast(unit) => &unit.info.channel,
            OutgoingUnit::Broadcast(unit) => &unit.channel,
        }
    }

    fn eos(&self) -> bool {
        match self {
            OutgoingUnit::Unicast(unit) => unit.info.eos,
            OutgoingUnit::Broadcast(unit) => unit.eos,
        }
    }
}

struct ChannelState {
    unicast: VecDeque<QueuedUnicast>,
    broadcast: VecDeque<BroadcastTransmitInfo>,
    packet_seq: i64,
    phase: ChannelPhase,
    running_sink_count: usize,
    request_template: PTransmitDataParams,
}

impl ChannelState {
    /// Drops every queued unit and returns how many were unicast.
    fn discard_queues(&mut self) -> usize {
        let unicast = self.unicast.len();
        self.unicast.clear();
        self.broadcast.clear();
        unicast
    }

    /// Returns true only on the transition into `TurnedOff`.
    fn turn_off(&mut self) -> bool {
        if self.phase == ChannelPhase::TurnedOff {
            return false;
        }
        self.phase = ChannelPhase::TurnedOff;
        true
    }
}

struct DestinationChannel {
    id: InstanceLoId,
    state: Mutex<ChannelState>,
    stats: RpcInstanceStatistics,
}

impl DestinationChannel {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Default)]
struct SenderHooks {
    gate: Option<Arc<dyn BackpressureGate>>,
    listener: Option<Weak<dyn ChannelFinishedListener>>,
}

#[derive(Debug, Default)]
struct GateState {
    total_queue_size: usize,
    blocked: bool,
}

pub struct ExchangeSinkBuffer {
    query_id: UniqueId,
    dest_node_id: PlanNodeId,
    node_id: PlanNodeId,
    query_ctx: Arc<QueryContext>,
    profile_level: i32,
    rpc_verbose_profile_max_instance_count: usize,
    exchange_sink_num: usize,
    options: ExchangeSinkOptions,
    transport: Arc<dyn ExchangeTransport>,
    channels: RwLock<HashMap<InstanceLoId, Arc<DestinationChannel>>>,
    senders: RwLock<BTreeMap<InstanceLoId, SenderHooks>>,
    queue_capacity: AtomicUsize,
    gate_state: Mutex<GateState>,
    is_failed: AtomicBool,
    rpc_count: AtomicI64,
    weak_self: Weak<ExchangeSinkBuffer>,
}

impl ExchangeSinkBuffer {
    pub fn new(
        query_id: UniqueId,
        dest_node_id: PlanNodeId,
        node_id: PlanNodeId,
        state: &RuntimeState,
        sender_ins_ids: &[InstanceLoId],
        transport: Arc<dyn ExchangeTransport>,
    ) -> Arc<Self> {
        Self::with_options(
            query_id,
            dest_node_id,
            node_id,
            state,
            sender_ins_ids,
            transport,
            ExchangeSinkOptions::from_config(),
        )
    }

    pub fn with_options(
        query_id: UniqueId,
        dest_node_id: PlanNodeId,
        node_id: PlanNodeId,
        state: &RuntimeState,
        sender_ins_ids: &[InstanceLoId],
        transport: Arc<dyn ExchangeTransport>,
        options: ExchangeSinkOptions,
    ) -> Arc<Self> {
        let senders = sender_ins_ids
            .iter()
            .map(|id| (*id, SenderHooks::default()))
            .collect();
        Arc::new_cyclic(|weak_self| Self {
            query_id,
            dest_node_id,
            node_id,
            query_ctx: Arc::clone(state.query_ctx()),
            profile_level: state.profile_level(),
            rpc_verbose_profile_max_instance_count: state.rpc_verbose_profile_max_instance_count(),
            exchange_sink_num: sender_ins_ids.len(),
            options,
            transport,
            channels: RwLock::new(HashMap::new()),
            senders: RwLock::new(senders),
            queue_capacity: AtomicUsize::new(0),
            gate_state: Mutex::new(GateState::default()),
            is_failed: AtomicBool::new(false),
            rpc_count: AtomicI64::new(0),
            weak_self: weak_self.clone(),
        })
    }

    /// Wires the backpressure gate and finish listener of one logical sender.
    pub fn set_dependency(
        &self,
        sender_ins_id: InstanceLoId,
        gate: Arc<dyn BackpressureGate>,
        listener: Weak<dyn ChannelFinishedListener>,
    ) {
        // Held across the insert so a concurrent capacity crossing sees either
        // both the new gate and the blocked flag, or neither.
        let gate_state = self.gate_state.lock().unwrap_or_else(|e| e.into_inner());
        {
            let mut senders = self.senders.write().unwrap_or_else(|e| e.into_inner());
            let hooks = senders.entry(sender_ins_id).or_default();
            hooks.gate = Some(Arc::clone(&gate));
            hooks.listener = Some(listener);
        }
        if gate_state.blocked {
            gate.block();
        }
    }

    /// Creates the destination record for `fragment_instance_id`. Repeated calls are no-ops.
    pub fn register_destination(&self, fragment_instance_id: UniqueId) {
        if self.is_failed() {
            return;
        }
        let low_id = fragment_instance_id.instance_lo_id();
        let destinations = {
            let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
            if channels.contains_key(&low_id) {
                return;
            }
            let request_template =
                PTransmitDataParams::new(fragment_instance_id, self.query_id, self.dest_node_id);
            channels.insert(
                low_id,
                Arc::new(DestinationChannel {
                    id: low_id,
                    state: Mutex::new(ChannelState {
                        unicast: VecDeque::new(),
                        broadcast: VecDeque::new(),
                        packet_seq: 0,
                        phase: ChannelPhase::Idle,
                        running_sink_count: self.exchange_sink_num,
                        request_template,
                    }),
                    stats: RpcInstanceStatistics::new(low_id),
                }),
            );
            channels.len()
        };
        self.queue_capacity.store(
            self.options.queue_capacity_factor.saturating_mul(destinations),
            Ordering::Release,
        );
        self.update_total_queue_size(0);
        debug!(
            "exchange sink buffer register destination: query_id={} dest_node_id={} finst={} destinations={}",
            self.query_id, self.dest_node_id, fragment_instance_id, destinations
        );
    }

    pub fn enqueue_unicast(&self, request: TransmitInfo) -> Result<(), ExchangeError> {
        if self.is_failed() {
            return Ok(());
        }
        let ins_id = request.channel.dest_ins_id();
        let channel = self.registered_channel(&request.channel)?;
        if let Some(block) = request.block.as_deref() {
            self.check_version(ins_id, block)?;
        }

        let send_now = {
            let mut state = channel.lock();
            if state.phase == ChannelPhase::TurnedOff {
                return Err(ExchangeError::EndOfStream);
            }
            let accounting = request.block.as_deref().map(|block| {
                TrackedBytes::new(
                    block.byte_size_long(),
                    Arc::clone(request.channel.sender().mem_tracker()),
                )
            });
            state.unicast.push_back(QueuedUnicast {
                info: request,
                _accounting: accounting,
            });
            self.update_total_queue_size(1);
            claim_if_idle(&mut state)
        };
        if send_now {
            self.send_rpc(ins_id)?;
        }
        Ok(())
    }

    pub fn enqueue_broadcast(&self, request: BroadcastTransmitInfo) -> Result<(), ExchangeError> {
        if self.is_failed() {
            return Ok(());
        }
        let ins_id = request.channel.dest_ins_id();
        let channel = self.registered_channel(&request.channel)?;
        self.check_version(ins_id, request.block_holder.block())?;

        let send_now = {
            let mut state = channel.lock();
            if state.phase == ChannelPhase::TurnedOff {
                return Err(ExchangeError::EndOfStream);
            }
            state.broadcast.push_back(request);
            claim_if_idle(&mut state)
        };
        if send_now {
            self.send_rpc(ins_id)?;
        }
        Ok(())
    }

    /// Sends the next queued unit of destination `id`, or marks it idle.
    fn send_rpc(&self, id: InstanceLoId) -> Result<(), ExchangeError> {
        let channel = self
            .channel(id)
            .ok_or_else(|| ExchangeError::invariant(id, "send on unknown instance"))?;

        let (mut unit, mut request) = {
            let mut state = channel.lock();
            if self.is_failed() {
                let discarded = state.discard_queues();
                self.update_total_queue_size(-signed(discarded));
                let newly_off = state.turn_off();
                drop(state);
                if newly_off {
                    self.notify_channel_finished(id);
                }
                return Ok(());
            }
            if state.phase == ChannelPhase::TurnedOff {
                return Ok(());
            }
            let unit = if let Some(unit) = state.unicast.pop_front() {
                self.update_total_queue_size(-1);
                OutgoingUnit::Unicast(unit)
            } else if let Some(unit) = state.broadcast.pop_front() {
                OutgoingUnit::Broadcast(unit)
            } else {
                state.phase = ChannelPhase::Idle;
                return Ok(());
            };
            state.phase = ChannelPhase::Sending;

            let mut request = state.request_template.snapshot();
            request.packet_seq = state.packet_seq;
            state.packet_seq += 1;
            (unit, request)
        };

        let sender = Arc::clone(unit.channel().sender());
        request.eos = unit.eos();
        request.sender_id = sender.sender_id();
        request.be_number = sender.be_number();
        match &mut unit {
            OutgoingUnit::Unicast(queued) => {
                if let Some(block) = queued.info.block.take_if(|b| !b.is_empty()) {
                    request.set_block(BlockSlot::Owned(block));
                }
                if !queued.info.exec_status.is_ok() {
                    request.exec_status = Some(queued.info.exec_status.clone());
                }
            }
            OutgoingUnit::Broadcast(shared) => {
                let block = shared.block_holder.block();
                if !block.is_empty() {
                    request.set_block(BlockSlot::Shared(Arc::clone(block)));
                }
            }
        }

        let channel_info = Arc::clone(unit.channel());
        let closure = self.send_closure(id, request.eos, channel_info.rpc_timeout_ms());
        let mode = if enable_http_send_block(
            &request,
            self.options.transfer_large_data_by_brpc,
            self.options.min_http_brpc_size_bytes,
        ) {
            TransmitMode::Http
        } else {
            TransmitMode::Native
        };

        let submitted = self
            .transport
            .submit(mode, &request, closure, channel_info.dest_addr());
        // The request never keeps a block past its send.
        drop(request.release_block());
        drop(unit);

        if let Err(err) = submitted {
            self.failed(id, &err.to_string());
            let newly_off = {
                let mut state = channel.lock();
                let discarded = state.discard_queues();
                self.update_total_queue_size(-signed(discarded));
                state.turn_off()
            };
            if newly_off {
                self.notify_channel_finished(id);
            }
            return Err(match err {
                ExchangeError::TransportFailure(_) => err,
                other => ExchangeError::transport(other.to_string()),
            });
        }
        Ok(())
    }

    fn send_closure(&self, id: InstanceLoId, eos: bool, timeout_ms: u64) -> ExchangeSendClosure {
        let weak_success = Weak::clone(&self.weak_self);
        let weak_failure = Weak::clone(&self.weak_self);
        ExchangeSendClosure::new(
            id,
            eos,
            RpcOptions {
                timeout_ms,
                ignore_eovercrowded: self.options.ignore_eovercrowded,
            },
            Box::new(
                move |id: InstanceLoId,
                      eos: bool,
                      result: PTransmitDataResult,
                      start_rpc_time: i64| {
                    let Some(buffer) = weak_success.upgrade() else {
                        return;
                    };
                    buffer.on_rpc_success(id, eos, result, start_rpc_time);
                },
            ),
            Box::new(move |id: InstanceLoId, err: String| {
                let Some(buffer) = weak_failure.upgrade() else {
                    return;
                };
                buffer.failed(id, &err);
                if let Err(e) = buffer.send_rpc(id) {
                    debug!("exchange send after failure: instance={} err={}", id, e);
                }
            }),
        )
    }

    fn on_rpc_success(
        &self,
        id: InstanceLoId,
        eos: bool,
        result: PTransmitDataResult,
        start_rpc_time: i64,
    ) {
        self.update_rpc_time(id, start_rpc_time, monotonic_now_ns());

        let status = result.status;
        if status.is_end_of_file() {
            self.set_receiver_eof(id);
        } else if !status.is_ok() {
            self.failed(
                id,
                &format!("exchange req success but status isn't ok: {status}"),
            );
        } else if eos && let Err(err) = self.ended(id) {
            self.failed(id, &err.to_string());
        }
        // Other senders may still have units queued here. After a failure this
        // closes the destination instead.
        if let Err(err) = self.send_rpc(id) {
            self.failed(
                id,
                &format!("exchange req success but status isn't ok: {err}"),
            );
        }
    }

    /// One sender finished destination `id`; the last one closes it.
    fn ended(&self, id: InstanceLoId) -> Result<(), ExchangeError> {
        let Some(channel) = self.channel(id) else {
            let known: Vec<InstanceLoId> = self.channel_ids();
            info!(
                "failed find the instance id: {} now registered destinations: {:?}",
                id, known
            );
            return Err(ExchangeError::invariant(id, "not find the instance id"));
        };
        let newly_off = {
            let mut state = channel.lock();
            state.running_sink_count = state.running_sink_count.saturating_sub(1);
            state.running_sink_count == 0 && state.turn_off()
        };
        if newly_off {
            self.notify_channel_finished(id);
        }
        Ok(())
    }

    /// Marks the whole buffer failed and cancels the query. Only the first call cancels.
    fn failed(&self, id: InstanceLoId, err: &str) {
        if self.is_failed.swap(true, Ordering::AcqRel) {
            debug!(
                "send rpc failed after buffer failure, instance id: {}, dest_node_id: {}, node id: {}, err: {}",
                id, self.dest_node_id, self.node_id, err
            );
            return;
        }
        info!(
            "send rpc failed, instance id: {}, dest_node_id: {}, node id: {}, err: {}",
            id, self.dest_node_id, self.node_id, err
        );
        self.query_ctx.cancel(err);
        self.transport.cancel_pending();
    }

    /// The receiver stopped consuming: drop what is queued and close the destination.
    pub fn set_receiver_eof(&self, id: InstanceLoId) {
        let Some(channel) = self.channel(id) else {
            debug!("receiver eof for unknown instance {}", id);
            return;
        };
        let newly_off = {
            let mut state = channel.lock();
            let discarded = state.discard_queues();
            // Without this the gates could stay blocked with nothing left to drain them.
            self.update_total_queue_size(-signed(discarded));
            debug!(
                "exchange receiver eof: instance={} dest_node_id={} discarded_unicast={}",
                id, self.dest_node_id, discarded
            );
            state.turn_off()
        };
        if newly_off {
            self.notify_channel_finished(id);
        }
    }

    /// Closes destination `id`. Senders are notified on the first call only.
    pub fn turn_off_channel(&self, id: InstanceLoId) -> Result<(), ExchangeError> {
        let channel = self
            .channel(id)
            .ok_or_else(|| ExchangeError::invariant(id, "turn off unknown instance"))?;
        let newly_off = channel.lock().turn_off();
        if newly_off {
            self.notify_channel_finished(id);
        }
        Ok(())
    }

    fn notify_channel_finished(&self, id: InstanceLoId) {
        debug!(
            "exchange channel turned off: instance={} dest_node_id={}",
            id, self.dest_node_id
        );
        let listeners: Vec<Arc<dyn ChannelFinishedListener>> = self
            .senders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter_map(|hooks| hooks.listener.as_ref().and_then(Weak::upgrade))
            .collect();
        for listener in listeners {
            listener.on_channel_finished(id);
        }
    }

    fn update_total_queue_size(&self, delta: isize) {
        let mut gate_state = self.gate_state.lock().unwrap_or_else(|e| e.into_inner());
        gate_state.total_queue_size = gate_state.total_queue_size.saturating_add_signed(delta);
        let capacity = self.queue_capacity.load(Ordering::Acquire);
        if gate_state.total_queue_size > capacity && !gate_state.blocked {
            gate_state.blocked = true;
            for gate in self.gates() {
                gate.block();
            }
        } else if gate_state.total_queue_size <= capacity && gate_state.blocked {
            gate_state.blocked = false;
            for gate in self.gates() {
                gate.set_ready();
            }
        }
    }

    fn gates(&self) -> Vec<Arc<dyn BackpressureGate>> {
        self.senders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter_map(|hooks| hooks.gate.clone())
            .collect()
    }

    fn check_version(&self, id: InstanceLoId, block: &PBlock) -> Result<(), ExchangeError> {
        check_be_exec_version(block.be_exec_version()).inspect_err(|err| {
            warn!(
                "exchange sink rejects block: instance={} dest_node_id={} err={}",
                id, self.dest_node_id, err
            );
        })
    }

    fn registered_channel(
        &self,
        channel: &ExchangeChannel,
    ) -> Result<Arc<DestinationChannel>, ExchangeError> {
        self.channel(channel.dest_ins_id())
            .ok_or_else(|| ExchangeError::NotRegistered {
                finst: channel.fragment_instance_id().to_string(),
            })
    }

    fn channel(&self, id: InstanceLoId) -> Option<Arc<DestinationChannel>> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    fn channel_ids(&self) -> Vec<InstanceLoId> {
        let mut ids: Vec<InstanceLoId> = self
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    fn sorted_channels(&self) -> Vec<Arc<DestinationChannel>> {
        let mut channels: Vec<Arc<DestinationChannel>> = self
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        channels.sort_unstable_by_key(|c| c.id);
        channels
    }

    pub fn update_rpc_time(&self, id: InstanceLoId, start_rpc_time: i64, receive_rpc_time: i64) {
        self.rpc_count.fetch_add(1, Ordering::Relaxed);
        match self.channel(id) {
            Some(channel) => channel.stats.record(receive_rpc_time - start_rpc_time),
            None => debug!("rpc time for unknown instance {}", id),
        }
    }

    /// `(max, min)` of per-destination summed RPC time.
    pub fn get_max_min_rpc_time(&self) -> (i64, i64) {
        let channels = self.sorted_channels();
        max_min_sum_time(channels.iter().map(|c| &c.stats))
    }

    pub fn get_sum_rpc_time(&self) -> i64 {
        self.sorted_channels()
            .iter()
            .map(|c| c.stats.sum_time())
            .sum()
    }

    pub fn rpc_count(&self) -> i64 {
        self.rpc_count.load(Ordering::Relaxed)
    }

    pub fn update_profile(&self, profile: &RuntimeProfile) {
        let max_rpc_timer = profile.add_timer("RpcMaxTime");
        let min_rpc_timer = profile.add_timer("RpcMinTime");
        let sum_rpc_timer = profile.add_timer("RpcSumTime");
        let count_rpc = profile.add_counter("RpcCount", TUnit::Unit);
        let avg_rpc_timer = profile.add_timer("RpcAvgTime");

        let (max_rpc_time, min_rpc_time) = self.get_max_min_rpc_time();
        max_rpc_timer.set(max_rpc_time);
        min_rpc_timer.set(min_rpc_time);

        let rpc_count = self.rpc_count();
        count_rpc.set(rpc_count);
        let sum_time = self.get_sum_rpc_time();
        sum_rpc_timer.set(sum_time);
        avg_rpc_timer.set(sum_time / rpc_count.max(1));

        let max_count = self.rpc_verbose_profile_max_instance_count;
        // Per-destination details are costly; only at high profile levels.
        if self.profile_level > 3 && max_count > 0 {
            let mut stats: Vec<_> = self
                .sorted_channels()
                .iter()
                .map(|c| c.stats.snapshot())
                .collect();
            stats.sort_by(|a, b| b.max_time.cmp(&a.max_time));
            let detail_profile = profile.child("RpcInstanceDetails");
            for stat in stats.iter().filter(|s| s.rpc_count != 0).take(max_count) {
                detail_profile.add_info_string(
                    format!("Instance {:x}", stat.inst_lo_id),
                    format!(
                        "Count: {}, MaxTime: {}, MinTime: {}, AvgTime: {}, SumTime: {}",
                        stat.rpc_count,
                        pretty_print(stat.max_time, TUnit::TimeNs),
                        pretty_print(stat.min_time, TUnit::TimeNs),
                        pretty_print(stat.avg_time(), TUnit::TimeNs),
                        pretty_print(stat.sum_time, TUnit::TimeNs),
                    ),
                );
            }
        }
    }

    pub fn debug_each_instance_queue_size(&self) -> String {
        let mut out = String::new();
        for channel in self.sorted_channels() {
            let queued = channel.lock().unicast.len();
            let _ = writeln!(out, "Instance: {}, queue size: {}", channel.id, queued);
        }
        out
    }

    /// Queues are left alone: a completion may still be draining them.
    pub fn close(&self) {
        debug!(
            "exchange sink buffer close: query_id={} dest_node_id={} node_id={}",
            self.query_id, self.dest_node_id, self.node_id
        );
    }

    pub fn is_failed(&self) -> bool {
        self.is_failed.load(Ordering::Acquire)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.load(Ordering::Acquire)
    }

    /// Unicast units queued and not yet handed to the transport.
    pub fn total_queue_size(&self) -> usize {
        self.gate_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .total_queue_size
    }

    /// `(unicast, broadcast)` queue lengths of one destination.
    pub fn queued_units(&self, id: InstanceLoId) -> Option<(usize, usize)> {
        self.channel(id).map(|c| {
            let state = c.lock();
            (state.unicast.len(), state.broadcast.len())
        })
    }

    pub fn is_turned_off(&self, id: InstanceLoId) -> Option<bool> {
        self.channel(id)
            .map(|c| c.lock().phase == ChannelPhase::TurnedOff)
    }

    pub fn is_idle(&self, id: InstanceLoId) -> Option<bool> {
        self.channel(id)
            .map(|c| c.lock().phase != ChannelPhase::Sending)
    }

    pub fn dest_node_id(&self) -> PlanNodeId {
        self.dest_node_id
    }

    pub fn node_id(&self) -> PlanNodeId {
        self.node_id
    }
}

impl std::fmt::Debug for ExchangeSinkBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSinkBuffer")
            .field("query_id", &self.query_id)
            .field("dest_node_id", &self.dest_node_id)
            .field("node_id", &self.node_id)
            .field("is_failed", &self.is_failed())
            .field("queue_capacity", &self.queue_capacity())
            .finish()
    }
}

fn claim_if_idle(state: &mut ChannelState) -> bool {
    if state.phase == ChannelPhase::Idle {
        state.phase = ChannelPhase::Sending;
        true
    } else {
        false
    }
}

fn signed(n: usize) -> isize {
    isize::try_from(n).unwrap_or(isize::MAX)
}
