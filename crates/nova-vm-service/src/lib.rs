//! VM-service-style debugging frontend over the Chrome DevTools Protocol.
//!
//! A debugging client speaks a VM-service-like JSON-RPC protocol to [`ProxyService`], which
//! drives a browser runtime through [`nova_cdp::CdpClient`]. Source locations are translated
//! through a [`locations::LocationTranslator`] and evaluation goes through an
//! [`compiler::ExpressionCompiler`].

pub mod breakpoints;
pub mod compiler;
pub mod error;
pub mod eval;
pub mod events;
pub mod execution;
pub mod hardening;
pub mod instances;
pub mod isolate;
pub mod locations;
pub mod object_registry;
pub mod protocol;
pub mod service;
pub mod wire_server;

pub use error::{ServiceError, ServiceResult};
pub use events::EventReceiver;
pub use service::ProxyService;
