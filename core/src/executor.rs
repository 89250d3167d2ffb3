//! Downstream request execution
//!
//! The breaker never talks to a dependency directly. It hands the request to
//! a [`RequestExecutor`] and inspects only whether the returned result is
//! `Ok` or `Err`.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Something that can perform one downstream call
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    type Request: Send + 'static;
    type Response: Send;
    type Error: Send + 'static;

    async fn invoke(&self, request: Self::Request) -> Result<Self::Response, Self::Error>;
}

/// Adapter turning an async closure into a [`RequestExecutor`]
///
/// ```rust
/// use shared_breaker::{FnExecutor, RequestExecutor};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let lookup = FnExecutor::new(|sku: u32| async move {
///     if sku == 0 { Err("unknown sku") } else { Ok(sku * 100) }
/// });
/// assert_eq!(lookup.invoke(7).await, Ok(700));
/// # }
/// ```
pub struct FnExecutor<F, Req> {
    f: F,
    _request: PhantomData<fn(Req)>,
}

impl<F, Req> FnExecutor<F, Req> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, Req, T, E> RequestExecutor for FnExecutor<F, Req>
where
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    Req: Send + 'static,
    T: Send,
    E: Send + 'static,
{
    type Request = Req;
    type Response = T;
    type Error = E;

    async fn invoke(&self, request: Req) -> Result<T, E> {
        (self.f)(request).await
    }
}

impl<F, Req> std::fmt::Debug for FnExecutor<F, Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor")
            .field("f", &"<closure>")
            .finish()
    }
}

#[cfg(feature = "http")]
pub use http::HttpExecutor;

#[cfg(feature = "http")]
mod http {
    use super::RequestExecutor;
    use async_trait::async_trait;

    /// Executes `reqwest` requests; non-2xx responses count as failures
    #[derive(Debug, Clone, Default)]
    pub struct HttpExecutor {
        client: reqwest::Client,
    }

    impl HttpExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }

        pub fn client(&self) -> &reqwest::Client {
            &self.client
        }
    }

    #[async_trait]
    impl RequestExecutor for HttpExecutor {
        type Request = reqwest::Request;
        type Response = reqwest::Response;
        type Error = reqwest::Error;

        async fn invoke(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
            self.client.execute(request).await?.error_for_status()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_executor_passes_request_through() {
        let executor = FnExecutor::new(|name: String| async move {
            if name.is_empty() {
                Err("empty name")
            } else {
                Ok(format!("hello {name}"))
            }
        });

        assert_eq!(
            executor.invoke("ops".to_string()).await,
            Ok("hello ops".to_string())
        );
        assert_eq!(executor.invoke(String::new()).await, Err("empty name"));
    }

    #[tokio::test]
    async fn test_fn_executor_invoked_once_per_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let executor = FnExecutor::new(move |n: u64| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(n * 2)
            }
        });

        assert_eq!(executor.invoke(21).await.unwrap(), 42);
        assert_eq!(executor.invoke(1).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[cfg(feature = "http")]
    #[tokio::test]
    async fn test_http_executor_reports_connection_failure() {
        let executor = HttpExecutor::new();
        let request = executor
            .client()
            .get("http://127.0.0.1:9/unreachable")
            .build()
            .unwrap();

        assert!(executor.invoke(request).await.is_err());
    }
}
