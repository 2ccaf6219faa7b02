//! The correlation engine.
//!
//! An [`Invoker`] owns the service table, the pending-response table and
//! the passive waiters for one endpoint. It talks to its peer only through
//! a [`Transport`]: outgoing calls are transmitted as request envelopes,
//! and inbound envelopes arrive through the sink installed by
//! [`Invoker::listen`].
//!
//! Responses are matched to calls solely by correlation key. Each call
//! settles exactly once: the response, the timeout and the abort signal
//! race inside one `select!`, and the losers are dropped with it.

pub mod error;
mod pending;
pub mod request;
pub mod service;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use portcall_core::{
    correlation_key, CorrelationKey, FuncName, InstanceId, RequestEnvelope, ResponseEnvelope,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::InvokerConfig;
use crate::transport::{InboundSink, Listener, Transport, TransportError};

pub use error::{InvokeError, WaitError};
use pending::{InFlight, PendingResponses, Waiters};
pub use request::{AbortSignal, InvokeRequest};
pub use service::{service_fn, CallContext, Outcome, Service, ServiceFn};

/// Remote-procedure engine for one endpoint.
pub struct Invoker<T: Transport> {
    config: InvokerConfig,
    instance_id: InstanceId,
    counter: AtomicU64,
    transport: T,
    services: DashMap<FuncName, Arc<dyn Service>>,
    pending: PendingResponses,
    waiters: Waiters,
    in_flight: InFlight,
}

impl<T: Transport> fmt::Debug for Invoker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("name", &self.config.name)
            .field("instance_id", &self.instance_id)
            .field("services", &self.services.len())
            .field("pending_responses", &self.pending.len())
            .field("pending_requests", &self.in_flight.count())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Invoker<T> {
    /// Creates an engine with a fresh instance id. Call [`listen`](Self::listen)
    /// to start receiving.
    pub fn new(config: InvokerConfig, transport: T) -> Arc<Self> {
        Arc::new(Self {
            config,
            instance_id: InstanceId::generate(),
            counter: AtomicU64::new(0),
            transport,
            services: DashMap::new(),
            pending: PendingResponses::default(),
            waiters: Waiters::default(),
            in_flight: InFlight::default(),
        })
    }

    /// Subscribes the engine to its transport.
    ///
    /// Inbound requests are handled on spawned tasks, so this must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if it cannot subscribe.
    pub fn listen(self: &Arc<Self>) -> Result<Listener, TransportError> {
        let sink = Arc::new(EngineSink {
            engine: Arc::downgrade(self),
        });
        let listener = self.transport.subscribe(sink)?;
        tracing::debug!(name = %self.config.name, instance = %self.instance_id, "listening");
        Ok(listener)
    }

    /// Registers `service` for `func`, replacing any previous handler.
    pub fn add(&self, func: impl Into<FuncName>, service: impl Service) {
        self.services.insert(func.into(), Arc::new(service));
    }

    /// Unregisters `func`. Returns `true` if a handler was removed.
    pub fn remove(&self, func: impl Into<FuncName>) -> bool {
        self.services.remove(&func.into()).is_some()
    }

    /// Calls a remote function.
    ///
    /// Fire-and-forget requests (`reply == false`) resolve to `Null` as soon
    /// as they are transmitted. Otherwise the call settles with the remote
    /// value, or fails on remote error, timeout, or abort.
    ///
    /// # Errors
    ///
    /// See [`InvokeError`]. Transport failures are returned directly and
    /// never reach the pending table.
    pub async fn invoke(&self, request: InvokeRequest) -> Result<Value, InvokeError> {
        let InvokeRequest {
            func,
            args,
            reply,
            timeout,
            signal,
            key,
            target_name,
            endpoint,
        } = request;
        // A zero timeout means no timeout, same as leaving it unset.
        let timeout = if reply {
            timeout
                .or(self.config.default_timeout)
                .filter(|after| !after.is_zero())
        } else {
            None
        };
        let deadline = timeout.map(|after| Instant::now() + after);

        if let Some(reason) = signal.as_ref().and_then(AbortSignal::reason) {
            return Err(InvokeError::Cancelled { func, reason });
        }

        let key = key.unwrap_or_else(|| self.next_key());
        let envelope = RequestEnvelope {
            func: func.clone(),
            args,
            reply,
            key: key.clone(),
            sender_instance: self.instance_id.clone(),
            target_name,
        };

        if !reply {
            self.transport.transmit(&envelope, endpoint).await?;
            tracing::debug!(func = %func, key = %key, "sent fire-and-forget call");
            return Ok(Value::Null);
        }

        let (_guard, rx) = self
            .pending
            .register(&key)
            .ok_or_else(|| InvokeError::DuplicateKey(key.clone()))?;
        self.transport.transmit(&envelope, endpoint).await?;
        tracing::debug!(func = %func, key = %key, "sent call");

        tokio::select! {
            settlement = rx => match settlement {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(InvokeError::Remote(error)),
                Err(_) => Err(InvokeError::Closed(key)),
            },
            () = elapsed(deadline) => {
                tracing::debug!(func = %func, key = %key, "call timed out");
                Err(InvokeError::Timeout {
                    func,
                    key,
                    after: timeout.unwrap_or_default(),
                })
            }
            reason = aborted(signal.as_ref()) => {
                tracing::debug!(func = %func, key = %key, reason = %reason, "call aborted");
                Err(InvokeError::Cancelled { func, reason })
            }
        }
    }

    /// Waits for the next inbound call to `func` and returns its arguments.
    ///
    /// The waiter is registered when this is called, not when the returned
    /// future is first polled, so a call triggered before awaiting is still
    /// observed. The call still runs its registered handler, if any.
    /// Concurrent waiters for the same function all observe the same call.
    ///
    /// # Errors
    ///
    /// Returns `WaitError::Timeout` if no call arrives in time.
    pub fn wait_invoke(
        &self,
        func: impl Into<FuncName>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<Value>, WaitError>> + Send + '_ {
        let func = func.into();
        let (guard, rx) = self.waiters.register(&func);
        async move {
            let _guard = guard;
            let received = match timeout {
                Some(after) => match tokio::time::timeout(after, rx).await {
                    Ok(received) => received,
                    Err(_) => return Err(WaitError::Timeout { func, after }),
                },
                None => rx.await,
            };
            received.map_err(|_| WaitError::Closed(func))
        }
    }

    /// Handles an inbound request and transmits its response.
    ///
    /// Returns the response envelope when one was produced for the caller.
    pub async fn handle_request(
        &self,
        mut request: RequestEnvelope,
        sender: Option<T::Sender>,
    ) -> Option<ResponseEnvelope> {
        let _in_flight = self.in_flight.guard();

        if request.sender_instance == self.instance_id {
            tracing::debug!(func = %request.func, key = %request.key, "dropping own request echo");
            return None;
        }
        if let Some(target) = request.target_name.as_deref() {
            if target != self.config.name {
                tracing::debug!(
                    func = %request.func,
                    target_name = target,
                    name = %self.config.name,
                    "dropping request addressed to another engine"
                );
                return None;
            }
        }

        let woken = self.waiters.resolve(&request.func, &request.args);
        if woken > 0 {
            tracing::debug!(func = %request.func, woken, "resolved waiters");
        }

        let service = self
            .services
            .get(&request.func)
            .map(|entry| Arc::clone(entry.value()));
        let outcome = match service {
            Some(service) => self.run(service.as_ref(), &mut request).await,
            None => {
                tracing::warn!(func = %request.func, key = %request.key, name = %self.config.name, "no service registered");
                if !self.config.reply_unknown_function {
                    return None;
                }
                Outcome::Failed(Value::String(format!("unknown service: {}", request.func)))
            }
        };

        let response = match outcome {
            Outcome::Reply(value) => ResponseEnvelope::success(&request, &self.config.name, value),
            Outcome::Failed(error) => ResponseEnvelope::failure(&request, &self.config.name, error),
            Outcome::Suppress => {
                tracing::debug!(func = %request.func, key = %request.key, "response suppressed by handler");
                return None;
            }
        };
        if !request.reply {
            return None;
        }
        let Some(sender) = sender else {
            tracing::debug!(func = %request.func, key = %request.key, "no sender to respond to");
            return None;
        };
        if let Err(err) = self.transport.transmit_response(&response, &sender).await {
            tracing::warn!(func = %request.func, key = %request.key, error = %err, "failed to transmit response");
        }
        Some(response)
    }

    /// Settles the pending call matching `response`.
    ///
    /// Returns `false` for stale or duplicate responses, which are only logged.
    pub fn handle_response(&self, response: ResponseEnvelope) -> bool {
        let ResponseEnvelope {
            key,
            func,
            success,
            value,
            name,
        } = response;
        let settlement = if success { Ok(value) } else { Err(value) };
        if self.pending.settle(&key, settlement) {
            tracing::debug!(key = %key, success, "settled call");
            return true;
        }
        if name == self.config.name {
            tracing::debug!(key = %key, "ignoring own response echo");
        } else {
            tracing::error!(key = %key, func = ?func, responder = %name, "no pending call for response");
        }
        false
    }

    async fn run(&self, service: &dyn Service, request: &mut RequestEnvelope) -> Outcome {
        let ctx = CallContext {
            func: request.func.clone(),
            key: request.key.clone(),
            caller: request.sender_instance.clone(),
            engine: self.config.name.clone(),
        };
        let span = tracing::info_span!("invoke", func = %request.func, key = %request.key, name = %self.config.name);
        let args = std::mem::take(&mut request.args);
        match AssertUnwindSafe(service.call(args, ctx))
            .catch_unwind()
            .instrument(span)
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(func = %request.func, key = %request.key, panic = %message, "service panicked");
                Outcome::Failed(Value::String(message))
            }
        }
    }

    fn next_key(&self) -> CorrelationKey {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        correlation_key(&self.config.name, &self.instance_id, counter)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    #[must_use]
    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// The transport this engine sends through.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of inbound requests currently being handled.
    #[must_use]
    pub fn pending_requests(&self) -> u64 {
        self.in_flight.count()
    }

    /// Number of outgoing calls awaiting a response.
    #[must_use]
    pub fn pending_responses(&self) -> usize {
        self.pending.len()
    }

    /// Number of functions with an active passive waiter.
    #[must_use]
    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Waits until no inbound request is being handled, up to `timeout`.
    ///
    /// Returns `false` if requests were still running at the deadline.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.in_flight.wait_for_idle(timeout).await
    }
}

async fn elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn aborted(signal: Option<&AbortSignal>) -> String {
    match signal {
        Some(signal) => signal.aborted().await,
        None => std::future::pending().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "service panicked".to_string()
    }
}

/// Feeds transport deliveries into an engine without keeping it alive.
struct EngineSink<T: Transport> {
    engine: Weak<Invoker<T>>,
}

impl<T: Transport> InboundSink<T::Sender> for EngineSink<T> {
    fn on_request(&self, request: RequestEnvelope, sender: Option<T::Sender>) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            engine.handle_request(request, sender).await;
        });
    }

    fn on_response(&self, response: ResponseEnvelope) {
        if let Some(engine) = self.engine.upgrade() {
            engine.handle_response(response);
        }
    }
}
