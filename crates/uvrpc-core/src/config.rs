use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::transport::ErrorFn;
use crate::{Addr, Error, TransportKind};

/// Session communication pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CommType {
    /// Correlated request/response (servers and clients).
    #[default]
    RequestResponse,
    /// Topic fan-out (publishers and subscribers).
    PubSub,
}

/// Batching and flush heuristics for transport writers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PerfMode {
    /// Flush after every frame.
    #[default]
    LowLatency,
    /// Drain the send queue in batches before flushing.
    HighThroughput,
}

/// Default per-connection send/receive queue soft limit, in frames.
pub const DEFAULT_HWM: usize = 10_000;

/// Validated session configuration.
///
/// Built through [`Config::builder`]; this is the only construction path.
#[derive(Clone)]
pub struct Config {
    pub handle: Handle,
    pub addr: Addr,
    pub comm_type: CommType,
    pub rcv_hwm: usize,
    pub snd_hwm: usize,
    pub perf_mode: PerfMode,
    /// Default deadline applied to client calls; `None` means calls wait
    /// indefinitely unless given an explicit timeout.
    pub call_timeout: Option<Duration>,
    pub(crate) on_error: Option<ErrorFn>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("addr", &self.addr)
            .field("comm_type", &self.comm_type)
            .field("rcv_hwm", &self.rcv_hwm)
            .field("snd_hwm", &self.snd_hwm)
            .field("perf_mode", &self.perf_mode)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The transport family, inferred from the address.
    pub fn transport(&self) -> TransportKind {
        self.addr.kind()
    }

    /// The error sink: the configured one, or a `tracing` warning.
    pub fn error_sink(&self) -> ErrorFn {
        match &self.on_error {
            Some(sink) => sink.clone(),
            None => Arc::new(|err: &Error| {
                tracing::warn!(error = %err, "transport error");
            }),
        }
    }
}

/// Builder for [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    handle: Option<Handle>,
    addr: Option<String>,
    transport: Option<TransportKind>,
    comm_type: CommType,
    rcv_hwm: Option<usize>,
    snd_hwm: Option<usize>,
    perf_mode: PerfMode,
    call_timeout: Option<Duration>,
    on_error: Option<ErrorFn>,
}

impl ConfigBuilder {
    /// Inject the event loop. Without this, the runtime ambient at
    /// [`build`](ConfigBuilder::build) time is used.
    pub fn loop_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Endpoint URI (`tcp://`, `udp://`, `ipc://`, `inproc://`). Required.
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Explicit transport selection; must agree with the address scheme.
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.transport = Some(kind);
        self
    }

    pub fn comm_type(mut self, comm_type: CommType) -> Self {
        self.comm_type = comm_type;
        self
    }

    /// Receive queue soft limit, in frames per connection.
    pub fn rcv_hwm(mut self, frames: usize) -> Self {
        self.rcv_hwm = Some(frames);
        self
    }

    /// Send queue soft limit, in frames per connection.
    pub fn snd_hwm(mut self, frames: usize) -> Self {
        self.snd_hwm = Some(frames);
        self
    }

    pub fn perf_mode(mut self, mode: PerfMode) -> Self {
        self.perf_mode = mode;
        self
    }

    /// Default deadline for client calls.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Sink for non-fatal transport errors.
    pub fn on_error(mut self, sink: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(sink));
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        let Some(addr) = self.addr else {
            return Err(Error::InvalidParam("address is required"));
        };
        let addr: Addr = addr.parse()?;

        if let Some(kind) = self.transport {
            if kind != addr.kind() {
                return Err(Error::InvalidParam(
                    "transport does not match the address scheme",
                ));
            }
        }

        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|_| Error::InvalidParam("no event loop: provide a runtime handle"))?,
        };

        let rcv_hwm = self.rcv_hwm.unwrap_or(DEFAULT_HWM);
        let snd_hwm = self.snd_hwm.unwrap_or(DEFAULT_HWM);
        if rcv_hwm == 0 || snd_hwm == 0 {
            return Err(Error::InvalidParam("high-water marks must be non-zero"));
        }

        Ok(Config {
            handle,
            addr,
            comm_type: self.comm_type,
            rcv_hwm,
            snd_hwm,
            perf_mode: self.perf_mode,
            call_timeout: self.call_timeout,
            on_error: self.on_error,
        })
    }
}
