//! Axum shell for relay.
//!
//! This crate puts an HTTP face on a [`relay_runtime::RelayNode`]: the
//! ingress pipeline that gates every request, the WebSocket transport that
//! turns connections into registry sessions, and the health surface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Ingress Pipeline             │  ← session cookie, params,
//! │  (ordered IngressStage list)            │    headers, CORS, body size,
//! │                                         │    compression
//! ├─────────────────────────────────────────┤
//! │            Router                       │
//! │  /ws  /health  /health/ready  /metrics  │  ← application routes merge here
//! ├─────────────────────────────────────────┤
//! │            RelayNode                    │
//! │  registry · fan-out · lifecycle         │  ← relay-runtime
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. **Request** arrives and gets a request id and span
//! 2. **Stages** run in order; any of them may reject
//! 3. **Context** (session, dropped params) is stored in extensions
//! 4. **Handler** runs
//! 5. **Stages** adjust the response in reverse order
//!
//! # Example
//!
//! ```ignore
//! use relay_web::{AppState, IngressConfig, IngressPipeline, router};
//!
//! let pipeline = IngressPipeline::standard(&ingress_config, Arc::new(SystemClock))?;
//! let app = router(AppState::new(node), pipeline);
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod ingress;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use config::{CorsConfig, DuplicateParams, IngressConfig, ParamPolicy, SessionConfig};
pub use error::{AppError, IngressRejection};
pub use extractors::{ClientSession, Polluted, RequestId};
pub use ingress::{
    IngressContext, IngressLayer, IngressPipeline, IngressStage, REQUEST_ID_HEADER, StageOutcome,
};
pub use router::{router, router_with};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
