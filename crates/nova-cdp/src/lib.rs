//! Chrome DevTools Protocol plumbing for the Nova VM service bridge.
//!
//! [`CdpClient`] speaks to a browser runtime over a `Content-Length` framed JSON stream (see
//! [`codec`]). A relay in front of the browser is expected to translate that framing to the
//! DevTools WebSocket endpoint.

mod client;
pub mod codec;
pub mod types;

#[cfg(any(test, feature = "wire-test-support"))]
pub mod mock;

pub use client::{CdpClient, CdpClientConfig};
pub use types::*;
