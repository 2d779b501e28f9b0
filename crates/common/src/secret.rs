//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the videoserver `apisecret`
//! and any other credential the engine is handed.
//!
//! `SecretString` implements `Debug` with redaction, so a struct that derives
//! `Debug` and holds a secret stays safe to log via `{:?}` or `tracing`.
//! Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct GatewayCredentials {
//!     url: String,
//!     api_secret: SecretString,
//! }
//!
//! let creds = GatewayCredentials {
//!     url: "http://videoserver:8088".to_string(),
//!     api_secret: SecretString::from("janus-secret"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("janus-secret"));
//! assert_eq!(creds.api_secret.expose_secret(), "janus-secret");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
