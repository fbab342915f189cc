//! Concrete transports.
//!
//! | Type                   | Trait                                   | Feature               |
//! |------------------------|-----------------------------------------|-----------------------|
//! | [`ReqwestTransport`]   | [`HttpTransport`](crate::HttpTransport) | always                |
//! | [`WebSocketTransport`] | [`Transport`](crate::Transport)         | `transport-websocket` |

pub mod http;

#[cfg(feature = "transport-websocket")]
pub mod websocket;

pub use http::ReqwestTransport;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
