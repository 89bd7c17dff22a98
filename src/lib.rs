//! openresponses: a streaming client for the Responses API.
//!
//! Decodes server-sent events into typed events, folds them into an
//! immutable snapshot of the in-progress response, tracks tool invocations,
//! and handles the approval/resume handshake for MCP calls and computer-use
//! safety checks.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use openresponses::prelude::*;
//!
//! # async fn example() -> openresponses::error::Result<()> {
//! let config = StreamConfig::load()?;
//! let transport = HttpTransport::from_config(&config, Arc::new(EnvCredentials::default()))?;
//! let body = build_request_body(
//!     &config,
//!     "Hello!".into(),
//!     &[],
//!     &ResponseSettings::default(),
//!     &AllowAllTools,
//! );
//!
//! let controller = StreamController::new(Arc::new(transport));
//! let handle = controller.start(StreamRequest::new(body).with_approval_policy(config.approval_policy));
//! if let SessionOutcome::Completed(response) = handle.wait().await? {
//!     println!("{}", response.output_text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod prelude;
pub mod request;
pub mod stream;
pub mod tools;
pub mod transport;
pub mod types;
