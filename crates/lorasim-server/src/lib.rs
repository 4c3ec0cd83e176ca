//! HTTP control plane for the simulator.
//!
//! A thin REST dispatcher over [`lorasim_core::Pool`]: the router in
//! [`http`] maps the control-plane operations onto pool and
//! network-server calls, with uniform error-to-status mapping.

pub mod handlers;
pub mod http;

pub use http::router;
