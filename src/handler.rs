//! Request handler abstraction and priority chain.
//!
//! Higher layers register [`RequestHandler`]s with a priority; inbound
//! requests are offered to each handler in priority order (lowest value
//! first) and the first non-`None` response wins.
//!
//! # Example
//!
//! ```ignore
//! let endpoint = Endpoint::builder("worker")
//!     .handle_fn(0, |request, _peer| async move {
//!         Some(Bytes::from(request.body.to_vec()))
//!     })
//!     .bind()
//!     .await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::message::Message;

/// Boxed future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handles an inbound request from a peer.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a request, returning the response body or `None` when this
    /// handler cannot handle it.
    fn handle(&self, request: Message, peer: &str) -> BoxFuture<'static, Option<Bytes>>;
}

/// Adapter turning an async closure into a [`RequestHandler`].
pub struct FnHandler<F>(F);

impl<F, Fut> FnHandler<F>
where
    F: Fn(Message, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Bytes>> + Send + 'static,
{
    /// Wrap the closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Message, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Bytes>> + Send + 'static,
{
    fn handle(&self, request: Message, peer: &str) -> BoxFuture<'static, Option<Bytes>> {
        Box::pin((self.0)(request, peer.to_string()))
    }
}

/// Priority-ordered handler chain.
#[derive(Clone, Default)]
pub struct HandlerChain {
    /// Sorted by priority, lowest first.
    handlers: Arc<Vec<(i32, Arc<dyn RequestHandler>)>>,
}

impl HandlerChain {
    /// Build a chain from (priority, handler) pairs.
    pub fn new(mut handlers: Vec<(i32, Arc<dyn RequestHandler>)>) -> Self {
        handlers.sort_by_key(|(priority, _)| *priority);
        Self {
            handlers: Arc::new(handlers),
        }
    }

    /// Offer a request to each handler in priority order.
    ///
    /// Returns the first non-`None` response, or `None` when no handler can
    /// handle the request.
    pub async fn dispatch(&self, request: Message, peer: &str) -> Option<Bytes> {
        for (_, handler) in self.handlers.iter() {
            if let Some(response) = handler.handle(request.clone(), peer).await {
                return Some(response);
            }
        }
        None
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether any handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
