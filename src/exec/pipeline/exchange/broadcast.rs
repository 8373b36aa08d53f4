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
//! Shared broadcast payloads and the limiter that bounds them.
//!
//! A broadcast block is serialized once and queued to every destination. The
//! `BroadcastPBlockHolder` is reference counted across those queues and gives
//! its bytes back to the `BroadcastMemLimiter` when the last destination has
//! sent or discarded it.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::common::config;
use crate::exec::pipeline::dependency::BackpressureGate;
use crate::novarocks_logging::debug;
use crate::service::proto::PBlock;

#[derive(Debug, Default)]
struct LimiterState {
    total_queue_buffer_size: i64,
    total_queue_blocks_count: i64,
}

/// Aggregate accounting for broadcast blocks that are queued but not yet sent.
pub struct BroadcastMemLimiter {
    state: Mutex<LimiterState>,
    buffer_size_limit: i64,
    blocks_count_limit: i64,
    broadcast_dependency: Arc<dyn BackpressureGate>,
}

impl BroadcastMemLimiter {
    pub fn new(broadcast_dependency: Arc<dyn BackpressureGate>) -> Arc<Self> {
        Self::with_limits(
            broadcast_dependency,
            config::exchange_broadcast_buffer_size_limit_bytes(),
            config::exchange_broadcast_buffer_blocks_limit(),
        )
    }

    pub fn with_limits(
        broadcast_dependency: Arc<dyn BackpressureGate>,
        buffer_size_limit: i64,
        blocks_count_limit: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LimiterState::default()),
            buffer_size_limit,
            blocks_count_limit,
            broadcast_dependency,
        })
    }

    /// Wraps `block` in a holder charged against this limiter.
    ///
    /// Blocks the broadcast dependency once either ceiling is reached.
    pub fn acquire(self: &Arc<Self>, block: PBlock) -> Arc<BroadcastPBlockHolder> {
        let size = i64::try_from(block.column_values().len()).unwrap_or(i64::MAX);
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.total_queue_buffer_size = state.total_queue_buffer_size.saturating_add(size);
            state.total_queue_blocks_count += 1;
            if state.total_queue_buffer_size >= self.buffer_size_limit
                || state.total_queue_blocks_count >= self.blocks_count_limit
            {
                self.broadcast_dependency.block();
            }
        }
        Arc::new(BroadcastPBlockHolder {
            block: Arc::new(block),
            size,
            limiter: Arc::downgrade(self),
        })
    }

    fn release(&self, size: i64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.total_queue_buffer_size -= size;
        state.total_queue_blocks_count -= 1;
        if state.total_queue_buffer_size <= 0 {
            self.broadcast_dependency.set_ready();
        }
    }

    pub fn total_queue_buffer_size(&self) -> i64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .total_queue_buffer_size
    }

    pub fn total_queue_blocks_count(&self) -> i64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .total_queue_blocks_count
    }
}

impl fmt::Debug for BroadcastMemLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastMemLimiter")
            .field("buffer_size_limit", &self.buffer_size_limit)
            .field("blocks_count_limit", &self.blocks_count_limit)
            .field("total_queue_buffer_size", &self.total_queue_buffer_size())
            .finish()
    }
}

/// One broadcast block shared by all destination queues.
pub struct BroadcastPBlockHolder {
    block: Arc<PBlock>,
    size: i64,
    limiter: Weak<BroadcastMemLimiter>,
}

impl BroadcastPBlockHolder {
    pub fn block(&self) -> &Arc<PBlock> {
        &self.block
    }

    /// Bytes charged to the limiter.
    pub fn size(&self) -> i64 {
        self.size
    }
}

impl Drop for BroadcastPBlockHolder {
    fn drop(&mut self) {
        // The limiter may already be gone at fragment teardown.
        match self.limiter.upgrade() {
            Some(limiter) => limiter.release(self.size),
            None => debug!("broadcast limiter dropped before holder, size={}", self.size),
        }
    }
}

impl fmt::Debug for BroadcastPBlockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastPBlockHolder")
            .field("size", &self.size)
            .finish()
    }
}
