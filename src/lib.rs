//! # a3s-ota
//!
//! Device-side over-the-air update client for the A3S ecosystem.
//!
//! ## Overview
//!
//! One call to [`update`] performs one check-in with the update service.
//! If an update is offered it is downloaded over HTTPS, verified against its
//! SHA-256 checksum, handed to an optional apply program, and the outcome is
//! reported back to the service.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_ota::{update, Context, Outcome, UpdateRequest};
//!
//! # fn example() -> a3s_ota::Result<()> {
//! let request = UpdateRequest {
//!     host: "https://api.example.com".to_string(),
//!     product: "P1".to_string(),
//!     token: "secret".to_string(),
//!     device: "D1".to_string(),
//!     version: "1.0.0".to_string(),
//!     path: "/var/lib/ota/update.bin".into(),
//!     script: Some("/usr/sbin/apply-update".into()),
//!     ..UpdateRequest::default()
//! };
//!
//! match update(&request, &Context::default())? {
//!     Outcome::NoUpdate => println!("up to date"),
//!     Outcome::Downloaded { version } | Outcome::Applied { version, .. } => {
//!         println!("updated to {}", version)
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **http**: one-shot HTTPS requests behind the [`Connector`] trait
//! - **json**: single-key lookup in a flat JSON object
//! - **checksum**: streaming SHA-256 of a file
//! - **download**: symlink-safe, exclusive artifact creation
//! - **apply**: shell-free invocation of the apply program
//! - **updater**: the check-in state machine tying these together

pub mod apply;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod context;
pub mod download;
pub mod error;
pub mod http;
pub mod json;
pub mod paths;
pub mod types;
pub mod updater;

// Re-export core types
pub use config::{OtaConfig, RequestDefaults, UpdaterConfig};
pub use context::Context;
pub use error::{DigestStage, ErrorKind, Result, UpdateError};
pub use http::{Connector, MockConnector, TlsConnector};
pub use types::{CheckInRequest, Properties, StatusReport, UpdateOffer};
pub use updater::{update, update_with, Outcome, UpdateRequest, Updater};
