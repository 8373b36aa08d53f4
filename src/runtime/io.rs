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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

use threadpool::ThreadPool;

use crate::common::config::exchange_io_threads;

pub struct IoTaskContext {
    cancelled: Arc<AtomicBool>,
}

impl IoTaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct IoTaskCompletion {
    done: AtomicBool,
    cv: Condvar,
    mu: Mutex<()>,
}

impl IoTaskCompletion {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            cv: Condvar::new(),
            mu: Mutex::new(()),
        }
    }

    fn mark_done(&self) {
        let _guard = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        self.done.store(true, Ordering::Release);
        self.cv.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        let guard = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |_| !self.done.load(Ordering::Acquire))
            .unwrap_or_else(|e| e.into_inner());
        drop(guard);
        self.done.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub struct IoTaskHandle {
    cancelled: Arc<AtomicBool>,
    completion: Arc<IoTaskCompletion>,
}

impl IoTaskHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.completion.done.load(Ordering::Acquire)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout)
    }
}

/// Thread pool that runs blocking exchange sends off the pipeline threads.
pub struct IoExecutor {
    pool: Mutex<ThreadPool>,
}

impl IoExecutor {
    pub fn new(num_threads: usize) -> Self {
        let threads = num_threads.max(1);
        let pool = ThreadPool::with_name("exchange_io".to_string(), threads);
        Self {
            pool: Mutex::new(pool),
        }
    }

    pub fn submit<F>(&self, task: F) -> IoTaskHandle
    where
        F: FnOnce(IoTaskContext) + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let completion = Arc::new(IoTaskCompletion::new());
        let ctx = IoTaskContext {
            cancelled: Arc::clone(&cancelled),
        };
        let completion_clone = Arc::clone(&completion);
        let runner = move || {
            task(ctx);
            completion_clone.mark_done();
        };
        self.pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .execute(runner);
        IoTaskHandle {
            cancelled,
            completion,
        }
    }

    pub fn active_count(&self) -> usize {
        self.pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active_count()
    }
}

static IO_EXECUTOR: OnceLock<Arc<IoExecutor>> = OnceLock::new();

pub fn io_executor() -> Arc<IoExecutor> {
    Arc::clone(IO_EXECUTOR.get_or_init(|| Arc::new(IoExecutor::new(exchange_io_threads()))))
}
