//! Callable handlers registered with an engine.

use std::future::Future;

use async_trait::async_trait;
use portcall_core::{CorrelationKey, FuncName, InstanceId};
use serde::Serialize;
use serde_json::Value;

/// What a handler produced for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Handled; respond with this value.
    Reply(Value),
    /// Handled; send no response even if the caller asked for one.
    Suppress,
    /// The handler failed; respond with this error payload.
    Failed(Value),
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Self::Reply(value)
    }
}

impl From<()> for Outcome {
    fn from((): ()) -> Self {
        Self::Reply(Value::Null)
    }
}

impl<T: Serialize, E: Serialize> From<Result<T, E>> for Outcome {
    fn from(result: Result<T, E>) -> Self {
        let encoded = match result {
            Ok(value) => serde_json::to_value(value).map(Self::Reply),
            Err(error) => serde_json::to_value(error).map(Self::Failed),
        };
        encoded.unwrap_or_else(|err| Self::Failed(Value::String(err.to_string())))
    }
}

/// Information about the call being handled.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub func: FuncName,
    pub key: CorrelationKey,
    /// Instance id of the calling engine.
    pub caller: InstanceId,
    /// Name of the engine running the handler.
    pub engine: String,
}

/// A function callable by remote engines.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn call(&self, args: Vec<Value>, ctx: CallContext) -> Outcome;
}

/// A [`Service`] backed by an async closure. See [`service_fn`].
#[derive(Debug, Clone)]
pub struct ServiceFn<F>(F);

/// Wraps an async closure as a [`Service`].
///
/// The closure may return anything convertible into an [`Outcome`]: a
/// `Value`, `()`, or a `Result` of serializable types.
pub fn service_fn<F, Fut, O>(f: F) -> ServiceFn<F>
where
    F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Into<Outcome> + Send + 'static,
{
    ServiceFn(f)
}

#[async_trait]
impl<F, Fut, O> Service for ServiceFn<F>
where
    F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Into<Outcome> + Send + 'static,
{
    async fn call(&self, args: Vec<Value>, ctx: CallContext) -> Outcome {
        (self.0)(args, ctx).await.into()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx() -> CallContext {
        CallContext {
            func: FuncName::from("sum"),
            key: "k".into(),
            caller: InstanceId::from("caller"),
            engine: "bg".to_string(),
        }
    }

    #[test]
    fn result_conversion() {
        assert_eq!(Outcome::from(Ok::<_, String>(5)), Outcome::Reply(json!(5)));
        assert_eq!(Outcome::from(Err::<i32, _>("x")), Outcome::Failed(json!("x")));
        assert_eq!(Outcome::from(()), Outcome::Reply(Value::Null));
    }

    #[tokio::test]
    async fn closure_service_receives_args_in_order() {
        let service = service_fn(|args: Vec<Value>, ctx: CallContext| async move {
            json!({"args": args, "engine": ctx.engine})
        });
        let outcome = service.call(vec![json!(1), json!("two")], ctx()).await;
        assert_eq!(
            outcome,
            Outcome::Reply(json!({"args": [1, "two"], "engine": "bg"}))
        );
    }

    #[tokio::test]
    async fn closure_service_can_suppress() {
        let service = service_fn(|_, _| async { Outcome::Suppress });
        assert_eq!(service.call(vec![], ctx()).await, Outcome::Suppress);
    }
}
