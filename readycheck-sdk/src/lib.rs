//! Automatic ready-check acceptance for a locally running game client.
//!
//! The SDK reads the client's lockfile, keeps an authenticated session against
//! its local API, and polls the game-flow phase. When a ready check opens it
//! is accepted once; when a match starts the current run ends. Front-ends
//! drive everything through [`AutoAccepter::toggle`] and read state from
//! [`AutoAccepter::status`] or the [`Event`] stream.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use readycheck_sdk::{AccepterConfig, AutoAccepter, LockfileSource};
//!
//! # async fn example() -> Result<(), readycheck_sdk::AccepterError> {
//! let accepter = AutoAccepter::new(Arc::new(LockfileSource::default()), AccepterConfig::default());
//! accepter.toggle().await?; // start
//! println!("{}", accepter.status_message());
//! accepter.toggle().await?; // stop
//! # Ok(())
//! # }
//! ```

pub mod accepter;
pub mod api;
pub mod error;
pub mod lockfile;
pub mod monitor;
pub mod phase;
pub mod poll;

pub use accepter::{AccepterConfig, AutoAccepter, LoopRunState};
pub use error::{AccepterError, LockfileError, TransportKind};
pub use lockfile::{ConnectionInfo, CredentialSource, LockfileSource, Protocol};
pub use monitor::{ConnectionState, Event, Status};
pub use phase::{Action, GamePhase};
pub use poll::LoopExit;
