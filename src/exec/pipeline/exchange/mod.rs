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
//! Exchange sink side of the pipeline.
//!
//! Responsibilities:
//! - Buffers outbound blocks per destination fragment instance and drives the
//!   transmit RPCs that carry them.
//! - Bounds shared broadcast blocks with a byte/count limiter.
//!
//! Key exported interfaces:
//! - Types: `ExchangeSinkBuffer`, `ExchangeChannel`, `ExchangeSinkSender`, `BroadcastMemLimiter`.
//! - Traits: `ChannelFinishedListener`.

pub mod broadcast;
pub mod channel;
pub mod rpc_stats;
pub mod sink_buffer;

pub use broadcast::{BroadcastMemLimiter, BroadcastPBlockHolder};
pub use channel::{ChannelFinishedListener, ExchangeChannel, ExchangeSinkSender};
pub use sink_buffer::{BroadcastTransmitInfo, ExchangeSinkBuffer, ExchangeSinkOptions, TransmitInfo};
