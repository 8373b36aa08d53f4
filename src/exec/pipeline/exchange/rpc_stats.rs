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
//! Per-destination RPC latency aggregates.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::common::types::InstanceLoId;

/// Running count/sum/max/min of RPC latency for one destination.
///
/// Updated from completion callbacks on arbitrary threads.
#[derive(Debug)]
pub struct RpcInstanceStatistics {
    inst_lo_id: InstanceLoId,
    rpc_count: AtomicI64,
    sum_time: AtomicI64,
    max_time: AtomicI64,
    min_time: AtomicI64,
}

/// Point-in-time copy used for reporting.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RpcStatsSnapshot {
    pub inst_lo_id: InstanceLoId,
    pub rpc_count: i64,
    pub sum_time: i64,
    pub max_time: i64,
    pub min_time: i64,
}

impl RpcStatsSnapshot {
    pub fn avg_time(&self) -> i64 {
        self.sum_time / self.rpc_count.max(1)
    }
}

impl RpcInstanceStatistics {
    pub fn new(inst_lo_id: InstanceLoId) -> Self {
        Self {
            inst_lo_id,
            rpc_count: AtomicI64::new(0),
            sum_time: AtomicI64::new(0),
            max_time: AtomicI64::new(0),
            min_time: AtomicI64::new(i64::MAX),
        }
    }

    /// Non-positive spans are ignored.
    pub fn record(&self, rpc_spend_time: i64) {
        if rpc_spend_time <= 0 {
            return;
        }
        self.rpc_count.fetch_add(1, Ordering::Relaxed);
        self.sum_time.fetch_add(rpc_spend_time, Ordering::Relaxed);
        self.max_time.fetch_max(rpc_spend_time, Ordering::Relaxed);
        self.min_time.fetch_min(rpc_spend_time, Ordering::Relaxed);
    }

    pub fn sum_time(&self) -> i64 {
        self.sum_time.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RpcStatsSnapshot {
        let rpc_count = self.rpc_count.load(Ordering::Relaxed);
        let min_time = self.min_time.load(Ordering::Relaxed);
        RpcStatsSnapshot {
            inst_lo_id: self.inst_lo_id,
            rpc_count,
            sum_time: self.sum_time.load(Ordering::Relaxed),
            max_time: self.max_time.load(Ordering::Relaxed),
            min_time: if rpc_count == 0 { 0 } else { min_time },
        }
    }
}

/// Max and min of the per-destination summed RPC time, skipping
/// destinations that never completed an RPC. Returns `(0, 0)` when none did.
pub fn max_min_sum_time<'a>(
    stats: impl IntoIterator<Item = &'a RpcInstanceStatistics>,
) -> (i64, i64) {
    let mut max_time = 0;
    let mut min_time = i64::MAX;
    for sum in stats.into_iter().map(RpcInstanceStatistics::sum_time) {
        if sum != 0 {
            max_time = max_time.max(sum);
            min_time = min_time.min(sum);
        }
    }
    (max_time, if min_time == i64::MAX { 0 } else { min_time })
}
