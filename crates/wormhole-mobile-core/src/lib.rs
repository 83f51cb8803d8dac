//! # Wormhole Mobile Core Library
//!
//! `wormhole-mobile-core` is the session logic behind a mobile
//! magic-wormhole client. The wormhole protocol and the platform services
//! (file picker, QR scanner, permission dialog, download manager) are
//! supplied by the embedding application through traits; this crate turns
//! them into cancellable, progress-reporting transfers driven by a single
//! event loop.
//!
//! ## Features
//!
//! - **One owner of state**: a single controller loop mutates the session
//! - **Cancel always wins**: races against confirm and permission are
//!   resolved in favour of cancel
//! - **Safe receives**: temp file plus no-clobber rename, cleaned up on
//!   every failure path
//! - **Bounded handoffs**: platform threads never block longer than 10 s
//!
//! ## Modules
//!
//! - [`code`] - Code URI parsing and code input normalization
//! - [`config`] - Persisted preferences
//! - [`error`] - Error taxonomy
//! - [`mod@file`] - Byte formatting, name sanitization, content sniffing
//! - [`platform`] - Platform services and cross-thread handoff
//! - [`progress`] - Byte-counting reader and progress throttling
//! - [`protocol`] - Wormhole protocol client interface
//! - [`session`] - Session state and the controller event loop
//! - [`transfer`] - Transfer workers and pending offers
//!
//! ## Example
//!
//! ```rust,ignore
//! use wormhole_mobile_core::session::{SessionController, UiEvent};
//!
//! let (controller, handle) = SessionController::new(client, platform, data_dir);
//! tokio::spawn(controller.run());
//!
//! handle.send(UiEvent::Receive("7-guitarist-revenge".to_string()))?;
//! let mut updates = handle.subscribe();
//! while updates.changed().await.is_ok() {
//!     println!("{}", updates.borrow().status);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod code;
pub mod config;
pub mod error;
pub mod file;
pub mod platform;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod transfer;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
