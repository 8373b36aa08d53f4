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
//! In-memory form of the data transmit RPC messages.
//!
//! Encoding these onto the wire is the transport's business; the exchange
//! buffer only fills in headers and moves block ownership in and out.

use std::sync::Arc;

use bytes::Bytes;

use crate::common::status::PStatus;
use crate::common::types::{PlanNodeId, UniqueId};

pub type PUniqueId = UniqueId;

/// Fixed per-message overhead used when estimating request size.
const TRANSMIT_HEADER_BYTES: usize = 64;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PColumnMeta {
    pub name: String,
    pub type_name: String,
}

/// Serialized row block as produced by the upstream operator.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PBlock {
    pub be_exec_version: i32,
    pub column_metas: Vec<PColumnMeta>,
    pub column_values: Bytes,
    pub compressed: bool,
    pub uncompressed_size: i64,
}

impl PBlock {
    pub fn new(be_exec_version: i32, column_metas: Vec<PColumnMeta>, column_values: Bytes) -> Self {
        let uncompressed_size = i64::try_from(column_values.len()).unwrap_or(i64::MAX);
        Self {
            be_exec_version,
            column_metas,
            column_values,
            compressed: false,
            uncompressed_size,
        }
    }

    pub fn be_exec_version(&self) -> i32 {
        self.be_exec_version
    }

    pub fn column_values(&self) -> &Bytes {
        &self.column_values
    }

    /// A block without column metas carries no rows and is not put on the wire.
    pub fn is_empty(&self) -> bool {
        self.column_metas.is_empty()
    }

    pub fn byte_size_long(&self) -> usize {
        let metas: usize = self
            .column_metas
            .iter()
            .map(|m| m.name.len() + m.type_name.len())
            .sum();
        self.column_values.len() + metas + 16
    }
}

/// Payload slot of a transmit request.
#[derive(Debug)]
pub enum BlockSlot {
    /// Unicast block, moved in for the duration of one send.
    Owned(Box<PBlock>),
    /// Broadcast block shared with other destinations.
    Shared(Arc<PBlock>),
}

impl BlockSlot {
    pub fn block(&self) -> &PBlock {
        match self {
            BlockSlot::Owned(block) => block,
            BlockSlot::Shared(block) => block,
        }
    }
}

#[derive(Debug, Default)]
pub struct PTransmitDataParams {
    pub finst_id: PUniqueId,
    pub query_id: PUniqueId,
    pub node_id: PlanNodeId,
    pub sender_id: i32,
    pub be_number: i32,
    pub eos: bool,
    pub packet_seq: i64,
    pub exec_status: Option<PStatus>,
    block: Option<BlockSlot>,
}

impl PTransmitDataParams {
    pub fn new(finst_id: PUniqueId, query_id: PUniqueId, node_id: PlanNodeId) -> Self {
        Self {
            finst_id,
            query_id,
            node_id,
            ..Default::default()
        }
    }

    pub fn block(&self) -> Option<&PBlock> {
        self.block.as_ref().map(BlockSlot::block)
    }

    pub fn has_block(&self) -> bool {
        self.block.is_some()
    }

    pub fn set_block(&mut self, slot: BlockSlot) {
        self.block = Some(slot);
    }

    /// Moves the payload back out so the envelope never outlives a send with data attached.
    pub fn release_block(&mut self) -> Option<BlockSlot> {
        self.block.take()
    }

    /// Copy a transport may keep after `submit` returns. Column bytes are shared.
    pub fn snapshot(&self) -> Self {
        Self {
            finst_id: self.finst_id,
            query_id: self.query_id,
            node_id: self.node_id,
            sender_id: self.sender_id,
            be_number: self.be_number,
            eos: self.eos,
            packet_seq: self.packet_seq,
            exec_status: self.exec_status.clone(),
            block: self
                .block()
                .map(|b| BlockSlot::Shared(Arc::new(b.clone()))),
        }
    }

    pub fn byte_size_long(&self) -> usize {
        TRANSMIT_HEADER_BYTES + self.block().map(PBlock::byte_size_long).unwrap_or(0)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PTransmitDataResult {
    pub status: PStatus,
}

impl PTransmitDataResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_status(status: PStatus) -> Self {
        Self { status }
    }
}
