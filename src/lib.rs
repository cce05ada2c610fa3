//! # peerlink
//!
//! Peer-to-peer inter-process transport over Unix Domain Sockets and
//! Windows Named Pipes.
//!
//! Every process is an [`Endpoint`] with a logical name. Endpoints reach
//! each other by name alone: each one binds a listener at a well-known
//! path derived from its name, and connects out on first use. A
//! registration handshake on every new connection tells the accepting
//! side who connected, so both directions of a peer pair end up bound to
//! the same session.
//!
//! Sessions survive transport loss: broken connections fail all in-flight
//! requests immediately and then reconnect under a bounded
//! [`ReconnectPolicy`], transparently to callers holding the endpoint.
//!
//! ## Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use peerlink::Endpoint;
//!
//! # async fn run() -> peerlink::Result<()> {
//! let server = Endpoint::builder("worker")
//!     .handle_fn(0, |request, _peer| async move {
//!         Some(Bytes::from(format!("got {} bytes", request.body.len())))
//!     })
//!     .bind()
//!     .await?;
//!
//! let client = Endpoint::builder("driver").bind().await?;
//! let reply = client.request("worker", vec![1, 2, 3]).await?;
//! assert_eq!(&reply[..], b"got 3 bytes");
//!
//! client.shutdown().await;
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handler;
pub mod message;
mod node;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::{Config, DispatchMode, ReconnectPolicy};
pub use error::{PeerlinkError, Result};
pub use events::PeerEvent;
pub use handler::{FnHandler, RequestHandler};
pub use message::Message;
pub use node::{Endpoint, EndpointBuilder};
pub use session::{SessionState, WriterConfig};
