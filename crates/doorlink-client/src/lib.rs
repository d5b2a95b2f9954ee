//! WebSocket session, CLI and configuration for the door-lock link
//!
//! [`DeviceSession`] is the entry point: it owns the socket, demultiplexes
//! binary media frames and JSON messages, and dispatches typed [`Event`]s to
//! listeners registered with [`DeviceSession::on`].
//!
//! ```no_run
//! use doorlink_client::{DeviceSession, Event, EventKind};
//! use url::Url;
//!
//! # async fn demo() -> doorlink_client::ClientResult<()> {
//! let session = DeviceSession::new();
//! session.on(EventKind::target_result("password"), |event| {
//!     if let Event::TargetResult(result) = event {
//!         println!("password: {:?}", result.password());
//!     }
//! });
//! session.connect(&Url::parse("ws://192.168.4.1:8080/ws").unwrap()).await?;
//! session.query("password", Default::default());
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod listeners;
pub mod pending;
pub mod reconnect;
pub mod session;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
pub use listeners::{Event, EventKind, Listener, PushEvent, StatusUpdate, Subscription};
pub use pending::{PendingInfo, PendingReply, ReplyCallback};
pub use reconnect::ReconnectPolicy;
pub use session::{ConnectionState, DeviceSession, SessionBuilder};
