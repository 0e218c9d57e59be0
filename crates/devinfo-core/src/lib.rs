//! Core types, errors, and shared functionality for devinfo.
//!
//! This crate provides the foundational types used throughout the devinfo system:
//!
//! - **Error types**: [`DevinfoError`] and [`Result`]
//! - **Device types**: the service [`Endpoint`], the [`DeviceRequest`] sent to it and
//!   the [`DeviceInfo`] it reports
//! - **Outcome types**: the [`CallOutcome`] state machine and its [`ErrorKind`]
//!   classification
//!
//! # Overview
//!
//! devinfo-core carries no networking or runtime dependencies. The RPC client
//! itself lives in `devinfo-client`; this crate only defines the vocabulary it
//! speaks.
//!
//! # Examples
//!
//! ## Creating an endpoint
//!
//! ```rust
//! use devinfo_core::Endpoint;
//!
//! let endpoint = Endpoint::from_uri("http://18.221.226.156:50051").unwrap();
//! assert!(!endpoint.is_secure());
//! assert_eq!(endpoint.authority(), "18.221.226.156:50051");
//! ```
//!
//! ## Inspecting an outcome
//!
//! ```rust
//! use devinfo_core::{CallOutcome, ErrorKind};
//!
//! let outcome = CallOutcome::failed(ErrorKind::NoData, "no device in response");
//! assert!(outcome.is_terminal());
//! assert!(!outcome.is_loading());
//! ```

pub mod device;
pub mod error;
pub mod outcome;

// Re-export commonly used types for convenience
pub use device::{DeviceInfo, DeviceRequest, Endpoint};
pub use error::{DevinfoError, Result};
pub use outcome::{CallOutcome, ErrorKind, SupersedePolicy};

/// Prelude module for convenient imports.
///
/// ```rust
/// use devinfo_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::device::{DeviceInfo, DeviceRequest, Endpoint};
    pub use crate::error::{DevinfoError, Result};
    pub use crate::outcome::{CallOutcome, ErrorKind};
}
