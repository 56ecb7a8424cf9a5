//! sandterm: client core for disposable, time-boxed sandbox shells.
//!
//! The backend executes each command statelessly inside a sandbox; this
//! crate maintains the illusion of a persistent interactive shell on top:
//! a session lifecycle state machine with a hard expiry countdown, a
//! command pipeline that re-asserts the working directory on every call,
//! remote-listing tab completion, and a transcript view model.

pub mod backend;
pub mod completion;
pub mod config;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod record;
pub mod session;
pub mod transcript;

pub use backend::{HttpBackend, SandboxBackend};
pub use config::{Config, Identity};
pub use pipeline::{Shell, ShellEvent};
pub use session::{SessionController, SessionStatus};
pub use transcript::{Line, LineKind, Terminal, Transcript};
