//! portcall-demo: calls a remote `sum` across one of the host channels.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use serde_json::{json, Value};

use portcall::host::{Document, Frame, HostConfig, Runtime, Window};
use portcall::telemetry::{init_tracing, LogConfig, LogFormat};
use portcall::{
    service_fn, ConnectionConfig, ConnectionTransport, EventBusConfig, EventBusTransport,
    InvokeRequest, Invoker, InvokerConfig, Listener, Peer, RelayConfig, RelayTransport, Transport,
    WindowConfig, WindowTransport,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    EventBus,
    Connection,
    Relay,
    Window,
}

/// Wires two engines across a host channel and calls `sum(2, 3)`.
#[derive(Parser, Debug)]
#[command(name = "portcall-demo")]
struct Args {
    /// Channel connecting the two engines.
    #[arg(long, value_enum, default_value = "event-bus")]
    transport: TransportKind,

    /// Emit logs as JSON lines.
    #[arg(long, env = "PORTCALL_JSON_LOGS")]
    json_logs: bool,

    /// Call timeout in milliseconds.
    #[arg(long, default_value = "1000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&LogConfig {
        format: if args.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        ..LogConfig::default()
    })?;

    let timeout = Duration::from_millis(args.timeout_ms);
    let value = match args.transport {
        TransportKind::EventBus => {
            let document = Arc::new(Document::new());
            let bus = EventBusConfig {
                event_type: "portcall-demo".to_string(),
                ..EventBusConfig::default()
            };
            let callee = Invoker::new(
                InvokerConfig::named("content"),
                EventBusTransport::new(Arc::clone(&document), "content", bus.clone()),
            );
            let caller = Invoker::new(
                InvokerConfig::named("page"),
                EventBusTransport::new(document, "page", bus),
            );
            round_trip(&callee, &caller, timeout, |_| Ok(())).await?
        }
        TransportKind::Connection => {
            let runtime = Runtime::new(HostConfig::default());
            let background = Arc::new(runtime.create_context());
            let tab = Arc::new(runtime.create_context());
            let callee = Invoker::new(
                InvokerConfig::named("background"),
                ConnectionTransport::new(background, ConnectionConfig::default()),
            );
            let caller = Invoker::new(
                InvokerConfig::named("tab"),
                ConnectionTransport::new(tab, ConnectionConfig::default()),
            );
            let value = round_trip(&callee, &caller, timeout, |caller| {
                caller.transport().connect(None)?;
                Ok(())
            })
            .await?;
            runtime.shutdown("demo finished");
            value
        }
        TransportKind::Relay => {
            let runtime = Runtime::new(HostConfig::default());
            let background = Arc::new(runtime.create_context());
            let tab = Arc::new(runtime.create_context());
            let target = RelayConfig {
                default_endpoint: Some(background.id()),
                ..RelayConfig::default()
            };
            let callee = Invoker::new(
                InvokerConfig::named("background"),
                RelayTransport::new(background, RelayConfig::default()),
            );
            let caller = Invoker::new(InvokerConfig::named("tab"), RelayTransport::new(tab, target));
            round_trip(&callee, &caller, timeout, |_| Ok(())).await?
        }
        TransportKind::Window => {
            let page = Window::open("https://page.example");
            let frame = Frame::new("https://frame.example");
            let callee = Invoker::new(
                InvokerConfig::named("frame"),
                WindowTransport::new(
                    frame.content_window(),
                    Peer::Window(Arc::clone(&page)),
                    WindowConfig::default(),
                ),
            );
            let caller = Invoker::new(
                InvokerConfig::named("page"),
                WindowTransport::new(page, Peer::Frame(frame), WindowConfig::default()),
            );
            round_trip(&callee, &caller, timeout, |_| Ok(())).await?
        }
    };

    println!("sum(2, 3) = {value}");
    Ok(())
}

/// Registers `sum` on `callee`, runs `prepare` on the caller once both
/// engines listen, then performs the call.
async fn round_trip<T, F>(
    callee: &Arc<Invoker<T>>,
    caller: &Arc<Invoker<T>>,
    timeout: Duration,
    prepare: F,
) -> anyhow::Result<Value>
where
    T: Transport,
    F: FnOnce(&Invoker<T>) -> anyhow::Result<()>,
{
    callee.add(
        "sum",
        service_fn(|args: Vec<Value>, _| async move {
            json!(args.iter().filter_map(Value::as_i64).sum::<i64>())
        }),
    );
    let _listeners: [Listener; 2] = [callee.listen()?, caller.listen()?];
    prepare(caller)?;

    let value = caller
        .invoke(InvokeRequest::new("sum").arg(2).arg(3).timeout(timeout))
        .await
        .with_context(|| format!("calling sum from {}", caller.name()))?;
    Ok(value)
}
