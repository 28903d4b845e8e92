//! Gantry lets a notebook kernel build, display, and drive DOM elements in
//! an output frame, and routes frame-side events back to kernel callbacks.
//!
//! The frame side is [`bridge::ElementBridge`]: a guid-keyed registry of
//! elements answering a flat message protocol, with inline listeners run in
//! an embedded QuickJS context. The kernel side is [`host::HostElement`],
//! which caches state locally until `display` creates the bridged elements.

pub mod bridge;
pub mod error;
pub mod host;
pub mod kernel;

pub use bridge::config::{ElementConfig, Message};
pub use bridge::{ElementBridge, ElementHandle};
pub use error::BridgeError;
pub use host::{ElementCallback, ElementSource, HostChild, HostElement};
pub use kernel::{CallbackRegistry, DiscardSink, KernelSink};
