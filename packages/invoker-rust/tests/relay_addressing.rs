//! Relay messaging with explicit endpoints.

use std::sync::Arc;
use std::time::Duration;

use portcall::host::{HostConfig, Runtime};
use portcall::{service_fn, InvokeRequest, Invoker, InvokerConfig, RelayConfig, RelayTransport};
use serde_json::json;

/// A call naming an endpoint reaches only that tab.
#[tokio::test]
async fn endpoint_selects_the_tab() {
    let runtime = Runtime::new(HostConfig::default());
    let background = Arc::new(runtime.create_context());
    let tab_one = Arc::new(runtime.create_context());
    let tab_two = Arc::new(runtime.create_context());
    let one_id = tab_one.id();
    let two_id = tab_two.id();

    let bg = Invoker::new(
        InvokerConfig::named("background"),
        RelayTransport::new(background, RelayConfig::default()),
    );
    let one = Invoker::new(InvokerConfig::named("tab"), RelayTransport::new(tab_one, RelayConfig::default()));
    let two = Invoker::new(InvokerConfig::named("tab"), RelayTransport::new(tab_two, RelayConfig::default()));
    one.add("whoami", service_fn(|_, _| async { json!("one") }));
    two.add("whoami", service_fn(|_, _| async { json!("two") }));
    let _listeners = [bg.listen().unwrap(), one.listen().unwrap(), two.listen().unwrap()];

    for (endpoint, expected) in [(one_id, "one"), (two_id, "two")] {
        let value = bg
            .invoke(
                InvokeRequest::new("whoami")
                    .endpoint(endpoint)
                    .timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert_eq!(value, json!(expected));
    }
    assert!(one.wait_for_idle(Duration::from_secs(1)).await);
    assert!(two.wait_for_idle(Duration::from_secs(1)).await);
}

/// A configured default endpoint is used when the call names none.
#[tokio::test]
async fn default_endpoint_applies() {
    let runtime = Runtime::new(HostConfig::default());
    let background = Arc::new(runtime.create_context());
    let tab = Arc::new(runtime.create_context());
    let bg_id = background.id();

    let bg = Invoker::new(
        InvokerConfig::named("background"),
        RelayTransport::new(background, RelayConfig::default()),
    );
    let config = RelayConfig {
        default_endpoint: Some(bg_id),
        ..RelayConfig::default()
    };
    let page = Invoker::new(InvokerConfig::named("tab"), RelayTransport::new(tab, config));
    bg.add("ping", service_fn(|_, _| async { json!("pong") }));
    let _listeners = [bg.listen().unwrap(), page.listen().unwrap()];

    let value = page
        .invoke(InvokeRequest::new("ping").timeout(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(value, json!("pong"));
}
