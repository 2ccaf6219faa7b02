//! Engine pairs wired across each host channel.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use portcall::host::{Context, Document, Frame, HostConfig, Runtime, Window};
use portcall::{
    ConnectionConfig, ConnectionState, ConnectionTransport, EventBusConfig, EventBusTransport,
    Invoker, InvokerConfig, Listener, Peer, RelayConfig, RelayTransport, Transport, WindowConfig,
    WindowTransport,
};

/// Two listening engines. `a` plays the callee in most scenarios.
pub struct Pair<T: Transport> {
    pub a: Arc<Invoker<T>>,
    pub b: Arc<Invoker<T>>,
    listeners: Vec<Listener>,
}

impl<T: Transport> Pair<T> {
    fn listening(a: Arc<Invoker<T>>, b: Arc<Invoker<T>>) -> Self {
        let listeners = vec![
            a.listen().expect("engine a should listen"),
            b.listen().expect("engine b should listen"),
        ];
        Self { a, b, listeners }
    }
}

pub fn event_bus_pair() -> Pair<EventBusTransport> {
    let document = Arc::new(Document::new());
    let config = EventBusConfig {
        event_type: "bridge".to_string(),
        ..EventBusConfig::default()
    };
    let a = Invoker::new(
        InvokerConfig::named("content"),
        EventBusTransport::new(Arc::clone(&document), "content", config.clone()),
    );
    let b = Invoker::new(
        InvokerConfig::named("page"),
        EventBusTransport::new(document, "page", config),
    );
    Pair::listening(a, b)
}

/// `a` runs in the background context; `b` in a tab that connects to it.
pub async fn connection_pair() -> Pair<ConnectionTransport> {
    let runtime = Runtime::new(HostConfig::default());
    let background = Arc::new(runtime.create_context());
    let tab = Arc::new(runtime.create_context());
    let a = Invoker::new(
        InvokerConfig::named("background"),
        ConnectionTransport::new(background, ConnectionConfig::default()),
    );
    let b = Invoker::new(
        InvokerConfig::named("tab"),
        ConnectionTransport::new(tab, ConnectionConfig::default()),
    );
    let pair = Pair::listening(a, b);
    pair.b
        .transport()
        .connect(None)
        .expect("tab should connect to the background");
    wait_connected(pair.a.transport()).await;
    pair
}

pub async fn wait_connected(transport: &ConnectionTransport) {
    tokio::time::timeout(Duration::from_secs(1), transport.connected())
        .await
        .expect("connection should be established");
    assert_eq!(transport.state(), ConnectionState::Connected);
}

pub fn relay_pair() -> Pair<RelayTransport> {
    let runtime = Runtime::new(HostConfig::default());
    let background: Arc<Context> = Arc::new(runtime.create_context());
    let tab = Arc::new(runtime.create_context());
    let a = Invoker::new(
        InvokerConfig::named("background"),
        RelayTransport::new(background, RelayConfig::default()),
    );
    let b = Invoker::new(
        InvokerConfig::named("tab"),
        RelayTransport::new(tab, RelayConfig::default()),
    );
    Pair::listening(a, b)
}

/// `a` lives in an embedded frame; `b` is the embedding page.
pub fn window_pair() -> Pair<WindowTransport> {
    let page = Window::open("https://page.test");
    let frame = Frame::new("https://frame.test");
    let a = Invoker::new(
        InvokerConfig::named("frame"),
        WindowTransport::new(
            frame.content_window(),
            Peer::Window(Arc::clone(&page)),
            WindowConfig::default(),
        ),
    );
    let b = Invoker::new(
        InvokerConfig::named("page"),
        WindowTransport::new(page, Peer::Frame(frame), WindowConfig::default()),
    );
    Pair::listening(a, b)
}

/// Polls `condition` until it holds, failing after one second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition did not hold within one second"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
