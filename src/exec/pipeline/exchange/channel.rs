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
//! Logical sender and channel metadata carried by every queued unit.

use std::fmt;
use std::sync::Arc;

use crate::common::config;
use crate::common::types::{InstanceLoId, NetAddress, UniqueId};
use crate::runtime::mem_tracker::MemTracker;

/// Receives the one-shot "destination closed" signal from the sink buffer.
pub trait ChannelFinishedListener: Send + Sync {
    fn on_channel_finished(&self, dest_ins_id: InstanceLoId);
}

/// One exchange sink operator instance feeding the buffer.
pub struct ExchangeSinkSender {
    sender_ins_id: InstanceLoId,
    sender_id: i32,
    be_number: i32,
    mem_tracker: Arc<MemTracker>,
}

impl ExchangeSinkSender {
    pub fn new(
        sender_ins_id: InstanceLoId,
        sender_id: i32,
        be_number: i32,
        parent_tracker: &Arc<MemTracker>,
    ) -> Arc<Self> {
        let mem_tracker = MemTracker::new_child(
            format!("ExchangeSinkSender_{sender_ins_id:x}"),
            parent_tracker,
        );
        Arc::new(Self {
            sender_ins_id,
            sender_id,
            be_number,
            mem_tracker,
        })
    }

    pub fn sender_ins_id(&self) -> InstanceLoId {
        self.sender_ins_id
    }

    pub fn sender_id(&self) -> i32 {
        self.sender_id
    }

    pub fn be_number(&self) -> i32 {
        self.be_number
    }

    /// Tracker charged with this sender's queued unicast bytes.
    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }

    pub fn memory_used(&self) -> i64 {
        self.mem_tracker.current()
    }
}

impl fmt::Debug for ExchangeSinkSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSinkSender")
            .field("sender_ins_id", &self.sender_ins_id)
            .field("sender_id", &self.sender_id)
            .field("be_number", &self.be_number)
            .finish()
    }
}

/// A sender's route to one destination fragment instance.
#[derive(Debug)]
pub struct ExchangeChannel {
    fragment_instance_id: UniqueId,
    dest_addr: NetAddress,
    rpc_timeout_ms: u64,
    sender: Arc<ExchangeSinkSender>,
}

impl ExchangeChannel {
    pub fn new(
        sender: Arc<ExchangeSinkSender>,
        fragment_instance_id: UniqueId,
        dest_addr: NetAddress,
    ) -> Arc<Self> {
        Self::with_rpc_timeout_ms(
            sender,
            fragment_instance_id,
            dest_addr,
            config::exchange_rpc_timeout_ms(),
        )
    }

    pub fn with_rpc_timeout_ms(
        sender: Arc<ExchangeSinkSender>,
        fragment_instance_id: UniqueId,
        dest_addr: NetAddress,
        rpc_timeout_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            fragment_instance_id,
            dest_addr,
            rpc_timeout_ms,
            sender,
        })
    }

    pub fn dest_ins_id(&self) -> InstanceLoId {
        self.fragment_instance_id.instance_lo_id()
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    pub fn dest_addr(&self) -> &NetAddress {
        &self.dest_addr
    }

    pub fn rpc_timeout_ms(&self) -> u64 {
        self.rpc_timeout_ms
    }

    pub fn sender(&self) -> &Arc<ExchangeSinkSender> {
        &self.sender
    }
}
