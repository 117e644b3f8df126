//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, proxy handler)
//!     → request.rs (request ID, request span)
//!     → [policy / upstream / transcode]
//!     → response.rs (headers, body) or redirect.rs (failure → 302 / 400)
//!     → Send to client
//! ```

pub mod redirect;
pub mod request;
pub mod response;
pub mod server;

pub use redirect::{respond_to_failure, Failure};
pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::{ResponseComposer, X_BYTES_SAVED, X_ORIGINAL_SIZE, X_PROXY_BYPASS};
pub use server::{AppState, HttpServer};
