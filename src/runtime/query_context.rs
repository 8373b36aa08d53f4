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
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::common::types::UniqueId;
use crate::exec::pipeline::schedule::observer::{Observable, Observer};
use crate::novarocks_logging::{debug, warn};
use crate::runtime::runtime_state::RuntimeErrorState;

/// Query-wide execution context shared by every fragment instance of a query
/// on this backend.
pub struct QueryContext {
    query_id: UniqueId,
    error_state: Arc<RuntimeErrorState>,
    cancelled: AtomicBool,
    cancel_requests: AtomicUsize,
    cancel_observable: Arc<Observable>,
}

impl QueryContext {
    pub fn new(query_id: UniqueId) -> Arc<Self> {
        Arc::new(Self {
            query_id,
            error_state: Arc::new(RuntimeErrorState::default()),
            cancelled: AtomicBool::new(false),
            cancel_requests: AtomicUsize::new(0),
            cancel_observable: Arc::new(Observable::new()),
        })
    }

    pub fn query_id(&self) -> UniqueId {
        self.query_id
    }

    /// Cancels the query. The first reason wins; later calls are recorded but
    /// do not re-notify observers.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.cancel_requests.fetch_add(1, Ordering::AcqRel);
        self.error_state.set_error(reason.clone());
        if self.cancelled.swap(true, Ordering::AcqRel) {
            debug!(
                "query already cancelled: query_id={} reason={}",
                self.query_id, reason
            );
            return;
        }
        warn!("cancel query: query_id={} reason={}", self.query_id, reason);
        let notify = self.cancel_observable.defer_notify();
        notify.arm();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.error_state.error()
    }

    /// Number of times `cancel` was invoked, including deduplicated calls.
    pub fn cancel_requests(&self) -> usize {
        self.cancel_requests.load(Ordering::Acquire)
    }

    pub fn add_cancel_observer(&self, observer: Observer) {
        if self.is_cancelled() {
            observer();
            return;
        }
        self.cancel_observable.add_observer(observer);
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("query_id", &self.query_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::QueryContext;
    use crate::common::types::UniqueId;

    #[test]
    fn first_cancel_reason_wins_and_observers_fire_once() {
        let ctx = QueryContext::new(UniqueId::new(1, 2));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        ctx.add_cancel_observer(Arc::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));

        ctx.cancel("first");
        ctx.cancel("second");

        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cancel_reason().as_deref(), Some("first"));
        assert_eq!(ctx.cancel_requests(), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
