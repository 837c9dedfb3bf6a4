use std::sync::Arc;

use bytes::Bytes;
use uvrpc_core::transport::ErrorFn;
use uvrpc_core::{Addr, Bus, BusStatsSnapshot, CommType, Config, Error, ReplySink, ReplyTarget, Request, Transport};
use uvrpc_wire::{Envelope, Kind};

/// RPC server: a listening transport bound to a bus of request handlers.
///
/// Each received Request frame is routed to the handler registered for its
/// method, together with a [`ReplySink`] bound to the originating peer and
/// msgid. Unknown methods are answered with `MethodNotFound`; envelope kinds
/// a server should never see (responses, publications) are dropped and
/// reported to the error sink.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    transport: Transport,
    bus: Arc<Bus>,
    on_error: ErrorFn,
}

impl Server {
    /// Bind the configured endpoint and start serving.
    ///
    /// Handlers may be registered before or after clients connect; a request
    /// racing its handler registration is answered `MethodNotFound`.
    pub async fn bind(config: Config) -> Result<Server, Error> {
        if config.comm_type != CommType::RequestResponse {
            return Err(Error::InvalidParam("server requires request-response mode"));
        }
        let bus = Arc::new(Bus::new());
        let on_error = config.error_sink();
        let transport = Transport::listen(&config).await?;

        let inner = Arc::new(ServerInner {
            transport: transport.clone(),
            bus,
            on_error: on_error.clone(),
        });
        let recv = inner.clone();
        transport.start(
            Arc::new(move |frame, target| recv.on_frame(frame, target)),
            on_error,
        )?;
        tracing::debug!(addr = %inner.transport.local_addr(), "server listening");
        Ok(Server { inner })
    }

    /// Register a request handler. Method names are case-sensitive and
    /// unique; re-registering is `AlreadyExists`.
    pub fn register(
        &self,
        method: impl Into<String>,
        handler: impl Fn(Request, ReplySink) + Send + Sync + 'static,
    ) -> Result<(), Error> {
        self.inner.bus.register_handler(method, Arc::new(handler))
    }

    pub fn unregister(&self, method: &str) -> Result<(), Error> {
        self.inner.bus.unregister_handler(method)
    }

    /// The bound address; for `:0` binds this carries the actual port.
    pub fn local_addr(&self) -> Addr {
        self.inner.transport.local_addr()
    }

    /// Peers currently connected (stream) or seen (datagram).
    pub fn peers(&self) -> Vec<ReplyTarget> {
        self.inner.transport.peers()
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.inner.bus.stats()
    }

    pub fn clear_stats(&self) {
        self.inner.bus.clear_stats()
    }

    /// Stop accepting work and release the endpoint. Idempotent; the
    /// injected runtime is untouched.
    pub fn shutdown(&self) {
        self.inner.transport.shutdown();
    }
}

impl ServerInner {
    fn on_frame(&self, frame: Bytes, target: ReplyTarget) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                (self.on_error)(&Error::EnvelopeDecode(err));
                return;
            }
        };
        match envelope.kind {
            Kind::Request => {
                let sink = ReplySink::new(
                    self.transport.clone(),
                    target,
                    envelope.name.clone(),
                    envelope.msgid,
                );
                self.bus.dispatch_request(&envelope, sink);
            }
            other => {
                (self.on_error)(&Error::UnexpectedKind(other));
            }
        }
    }
}
