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
//! Transport seam for exchange data transmission.
//!
//! Responsibilities:
//! - Defines how the sink buffer hands a request to the RPC layer and how the
//!   outcome comes back (`ExchangeSendClosure`).
//! - Chooses between the native and the HTTP-tunneled send path.
//! - Provides `IoExecutorTransport`, which runs blocking sends on the exchange
//!   I/O thread pool.
//!
//! Key exported interfaces:
//! - Traits: `ExchangeTransport`, `BlockingTransmitter`.
//! - Types: `TransmitMode`, `RpcOptions`, `ExchangeSendClosure`, `IoExecutorTransport`.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::common::status::ExchangeError;
use crate::common::types::{InstanceLoId, NetAddress};
use crate::novarocks_logging::debug;
use crate::runtime::io::{IoExecutor, IoTaskHandle, io_executor};
use crate::runtime::profile::clamp_u128_to_i64;
use crate::service::proto::{PTransmitDataParams, PTransmitDataResult};

/// Which RPC method carries a request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransmitMode {
    /// Regular `transmit_block` call.
    Native,
    /// `transmit_block_by_http`: payload attached as an HTTP body so it may exceed the RPC message cap.
    Http,
}

impl fmt::Display for TransmitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmitMode::Native => write!(f, "native"),
            TransmitMode::Http => write!(f, "http"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RpcOptions {
    pub timeout_ms: u64,
    /// Send even when the server-side write queue reports overcrowding.
    pub ignore_eovercrowded: bool,
}

impl RpcOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Whether a request should travel over the HTTP-tunneled path.
pub fn enable_http_send_block(
    request: &PTransmitDataParams,
    transfer_large_data_by_brpc: bool,
    min_http_brpc_size_bytes: usize,
) -> bool {
    if !transfer_large_data_by_brpc {
        return false;
    }
    let Some(block) = request.block() else {
        return false;
    };
    if block.column_values().is_empty() {
        return false;
    }
    request.byte_size_long() >= min_http_brpc_size_bytes
}

/// Monotonic nanoseconds since the first call in this process.
pub fn monotonic_now_ns() -> i64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    clamp_u128_to_i64(start.elapsed().as_nanos())
}

pub type SendSuccessHandler = Box<dyn FnOnce(InstanceLoId, bool, PTransmitDataResult, i64) + Send>;
pub type SendFailureHandler = Box<dyn FnOnce(InstanceLoId, String) + Send>;

/// Completion handle for one in-flight transmit request.
///
/// `complete` consumes the closure, so each submitted request resolves at most once.
pub struct ExchangeSendClosure {
    instance_id: InstanceLoId,
    eos: bool,
    start_rpc_time_ns: i64,
    options: RpcOptions,
    on_success: SendSuccessHandler,
    on_failure: SendFailureHandler,
}

impl ExchangeSendClosure {
    pub fn new(
        instance_id: InstanceLoId,
        eos: bool,
        options: RpcOptions,
        on_success: SendSuccessHandler,
        on_failure: SendFailureHandler,
    ) -> Self {
        Self {
            instance_id,
            eos,
            start_rpc_time_ns: monotonic_now_ns(),
            options,
            on_success,
            on_failure,
        }
    }

    pub fn instance_id(&self) -> InstanceLoId {
        self.instance_id
    }

    pub fn eos(&self) -> bool {
        self.eos
    }

    pub fn start_rpc_time_ns(&self) -> i64 {
        self.start_rpc_time_ns
    }

    pub fn options(&self) -> RpcOptions {
        self.options
    }

    /// `Err` means the call itself failed: timeout, connection loss, cancelled controller.
    pub fn complete(self, outcome: Result<PTransmitDataResult, String>) {
        match outcome {
            Ok(result) => (self.on_success)(self.instance_id, self.eos, result, self.start_rpc_time_ns),
            Err(err) => (self.on_failure)(self.instance_id, err),
        }
    }
}

impl fmt::Debug for ExchangeSendClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSendClosure")
            .field("instance_id", &self.instance_id)
            .field("eos", &self.eos)
            .field("start_rpc_time_ns", &self.start_rpc_time_ns)
            .finish()
    }
}

/// Asynchronous RPC client used by the exchange sink buffer.
///
/// `submit` must not block on the network. The closure is completed later on
/// any thread, or synchronously from inside `submit`. The request is only
/// borrowed; implementations that need it after returning take a `snapshot`.
/// An `Err` return means the request was never handed off and the closure
/// will not be completed.
pub trait ExchangeTransport: Send + Sync {
    fn submit(
        &self,
        mode: TransmitMode,
        request: &PTransmitDataParams,
        closure: ExchangeSendClosure,
        dest: &NetAddress,
    ) -> Result<(), ExchangeError>;

    /// Asks submissions that have not started yet to fail fast. Their closures
    /// are still completed exactly once.
    fn cancel_pending(&self) {}
}

/// Blocking request/response client for one transmit call.
pub trait BlockingTransmitter: Send + Sync + 'static {
    fn transmit(
        &self,
        mode: TransmitMode,
        dest: &NetAddress,
        request: PTransmitDataParams,
        timeout: Duration,
    ) -> Result<PTransmitDataResult, String>;
}

/// Runs a `BlockingTransmitter` on the exchange I/O pool.
pub struct IoExecutorTransport<T: BlockingTransmitter> {
    transmitter: Arc<T>,
    executor: Arc<IoExecutor>,
    in_flight: Mutex<Vec<IoTaskHandle>>,
}

impl<T: BlockingTransmitter> IoExecutorTransport<T> {
    pub fn new(transmitter: Arc<T>) -> Self {
        Self::with_executor(transmitter, io_executor())
    }

    pub fn with_executor(transmitter: Arc<T>, executor: Arc<IoExecutor>) -> Self {
        Self {
            transmitter,
            executor,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.len()
    }
}

impl<T: BlockingTransmitter> ExchangeTransport for IoExecutorTransport<T> {
    fn submit(
        &self,
        mode: TransmitMode,
        request: &PTransmitDataParams,
        closure: ExchangeSendClosure,
        dest: &NetAddress,
    ) -> Result<(), ExchangeError> {
        let request = request.snapshot();
        let dest = dest.clone();
        let transmitter = Arc::clone(&self.transmitter);
        let timeout = closure.options().timeout();
        debug!(
            "exchange submit: dest={} finst={} seq={} eos={} mode={}",
            dest, request.finst_id, request.packet_seq, request.eos, mode
        );
        let handle = self.executor.submit(move |ctx| {
            if ctx.is_cancelled() {
                closure.complete(Err("exchange send task cancelled".to_string()));
                return;
            }
            let outcome = transmitter.transmit(mode, &dest, request, timeout);
            closure.complete(outcome);
        });
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.push(handle);
        Ok(())
    }

    fn cancel_pending(&self) {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        for handle in in_flight.iter().filter(|handle| !handle.is_finished()) {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;

    use super::{
        BlockingTransmitter, ExchangeSendClosure, ExchangeTransport, IoExecutorTransport,
        RpcOptions, TransmitMode, enable_http_send_block,
    };
    use crate::common::status::PStatus;
    use crate::common::types::{NetAddress, UniqueId};
    use crate::runtime::io::IoExecutor;
    use crate::service::proto::{
        BlockSlot, PBlock, PColumnMeta, PTransmitDataParams, PTransmitDataResult,
    };

    fn request_with(len: usize) -> PTransmitDataParams {
        let mut req = PTransmitDataParams::new(UniqueId::new(1, 2), UniqueId::new(3, 4), 1);
        let block = PBlock::new(
            3,
            vec![PColumnMeta {
                name: "k".to_string(),
                type_name: "BIGINT".to_string(),
            }],
            Bytes::from(vec![0u8; len]),
        );
        req.set_block(BlockSlot::Owned(Box::new(block)));
        req
    }

    fn options() -> RpcOptions {
        RpcOptions {
            timeout_ms: 1000,
            ignore_eovercrowded: true,
        }
    }

    #[test]
    fn http_path_needs_flag_payload_and_size() {
        let small = request_with(10);
        let large = request_with(4096);
        assert!(!enable_http_send_block(&large, false, 1024));
        assert!(!enable_http_send_block(&small, true, 1024));
        assert!(enable_http_send_block(&large, true, 1024));
        let header_only = PTransmitDataParams::default();
        assert!(!enable_http_send_block(&header_only, true, 0));
    }

    #[test]
    fn closure_routes_outcome_to_one_handler() {
        let (tx, rx) = mpsc::channel();
        let tx_fail = tx.clone();
        let closure = ExchangeSendClosure::new(
            42,
            true,
            options(),
            Box::new(move |id: i64, eos: bool, result: PTransmitDataResult, _: i64| {
                tx.send(format!("ok {id} {eos} {}", result.status.is_ok()))
                    .unwrap();
            }),
            Box::new(move |id: i64, err: String| {
                tx_fail.send(format!("err {id} {err}")).unwrap();
            }),
        );
        closure.complete(Ok(PTransmitDataResult::ok()));
        assert_eq!(rx.recv().unwrap(), "ok 42 true true");
        assert!(rx.try_recv().is_err());
    }

    struct EchoTransmitter;

    impl BlockingTransmitter for EchoTransmitter {
        fn transmit(
            &self,
            mode: TransmitMode,
            _dest: &NetAddress,
            request: PTransmitDataParams,
            _timeout: Duration,
        ) -> Result<PTransmitDataResult, String> {
            if mode == TransmitMode::Http {
                return Err("http disabled".to_string());
            }
            Ok(PTransmitDataResult::with_status(PStatus::with_code(
                crate::common::status::StatusCode::Ok,
                format!("seq={}", request.packet_seq),
            )))
        }
    }

    #[test]
    fn io_executor_transport_completes_off_thread() {
        let transport = IoExecutorTransport::with_executor(
            Arc::new(EchoTransmitter),
            Arc::new(IoExecutor::new(2)),
        );
        let (tx, rx) = mpsc::channel();
        for (seq, mode) in [(0, TransmitMode::Native), (1, TransmitMode::Http)] {
            let mut req = request_with(8);
            req.packet_seq = seq;
            let tx_ok = tx.clone();
            let tx_err = tx.clone();
            let closure = ExchangeSendClosure::new(
                7,
                false,
                options(),
                Box::new(move |_: i64, _: bool, result: PTransmitDataResult, _: i64| {
                    tx_ok.send(Ok(result.status.error_msgs.join(""))).unwrap();
                }),
                Box::new(move |_: i64, err: String| {
                    tx_err.send(Err(err)).unwrap();
                }),
            );
            transport
                .submit(mode, &req, closure, &NetAddress::new("127.0.0.1", 8060))
                .unwrap();
            // The transport keeps its own copy.
            assert!(req.release_block().is_some());
        }
        let mut outcomes: Vec<Result<String, String>> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        outcomes.sort();
        assert_eq!(
            outcomes,
            vec![Ok("seq=0".to_string()), Err("http disabled".to_string())]
        );
    }
    struct GatedTransmitter {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl BlockingTransmitter for GatedTransmitter {
        fn transmit(
            &self,
            _mode: TransmitMode,
            _dest: &NetAddress,
            _request: PTransmitDataParams,
            _timeout: Duration,
        ) -> Result<PTransmitDataResult, String> {
            self.started.lock().unwrap().send(()).map_err(|e| e.to_string())?;
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|e| e.to_string())?;
            Ok(PTransmitDataResult::ok())
        }
    }

    #[test]
    fn cancel_pending_fails_queued_sends() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let transport = IoExecutorTransport::with_executor(
            Arc::new(GatedTransmitter {
                started: Mutex::new(started_tx),
                release: Mutex::new(release_rx),
            }),
            Arc::new(IoExecutor::new(1)),
        );
        let (tx, rx) = mpsc::channel();
        for seq in 0..3 {
            let mut req = request_with(8);
            req.packet_seq = seq;
            let tx_ok = tx.clone();
            let tx_err = tx.clone();
            let closure = ExchangeSendClosure::new(
                seq,
                false,
                options(),
                Box::new(move |id: i64, _: bool, _: PTransmitDataResult, _: i64| {
                    tx_ok.send((id, true)).unwrap();
                }),
                Box::new(move |id: i64, _: String| {
                    tx_err.send((id, false)).unwrap();
                }),
            );
            transport
                .submit(
                    TransmitMode::Native,
                    &req,
                    closure,
                    &NetAddress::new("127.0.0.1", 8060),
                )
                .unwrap();
        }
        // The single worker is parked in the first send; the other two are queued.
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        transport.cancel_pending();
        release_tx.send(()).unwrap();

        let mut outcomes: Vec<(i64, bool)> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        outcomes.sort();
        assert_eq!(outcomes, vec![(0, true), (1, false), (2, false)]);
        assert!(rx.try_recv().is_err());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while transport.in_flight_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(transport.in_flight_count(), 0);
    }
}
