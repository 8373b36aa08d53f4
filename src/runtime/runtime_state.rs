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
use std::sync::{Arc, Mutex};

use crate::common::config;
use crate::common::types::UniqueId;
use crate::runtime::mem_tracker::{self, MemTracker};
use crate::runtime::query_context::QueryContext;

/// Per-fragment-instance execution context, similar to StarRocks BE RuntimeState.
///
/// The exchange sink buffer reads its query context, profile verbosity and
/// memory tracker from here.
#[derive(Clone, Debug)]
pub struct RuntimeState {
    query_ctx: Arc<QueryContext>,
    fragment_instance_id: UniqueId,
    profile_level: i32,
    rpc_verbose_profile_max_instance_count: usize,
    mem_tracker: Arc<MemTracker>,
}

#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: Mutex<Option<String>>,
}

impl RuntimeErrorState {
    pub fn set_error(&self, err: String) {
        let mut guard = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl RuntimeState {
    pub fn new(query_ctx: Arc<QueryContext>, fragment_instance_id: UniqueId) -> Self {
        let query_id = query_ctx.query_id();
        let process = mem_tracker::process_mem_tracker();
        let query_tracker =
            MemTracker::new_child(format!("query_{:x}_{:x}", query_id.hi, query_id.lo), &process);
        let mem_tracker = MemTracker::new_child(
            format!(
                "fragment_{:x}_{:x}",
                fragment_instance_id.hi, fragment_instance_id.lo
            ),
            &query_tracker,
        );
        Self {
            query_ctx,
            fragment_instance_id,
            profile_level: config::profile_level(),
            rpc_verbose_profile_max_instance_count: config::rpc_verbose_profile_max_instance_count(),
            mem_tracker,
        }
    }

    pub fn with_profile_level(mut self, level: i32, rpc_verbose_max_instance_count: usize) -> Self {
        self.profile_level = level;
        self.rpc_verbose_profile_max_instance_count = rpc_verbose_max_instance_count;
        self
    }

    pub fn query_ctx(&self) -> &Arc<QueryContext> {
        &self.query_ctx
    }

    pub fn query_id(&self) -> UniqueId {
        self.query_ctx.query_id()
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    pub fn profile_level(&self) -> i32 {
        self.profile_level
    }

    pub fn rpc_verbose_profile_max_instance_count(&self) -> usize {
        self.rpc_verbose_profile_max_instance_count
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }
}
