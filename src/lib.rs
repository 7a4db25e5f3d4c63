//! xtk - toplevel window-manager integration for X11 toolkits
//!
//! The crate keeps a registry of logical windows grouped into applications
//! and displays, translates and filters server events, implements pointer
//! grabs with synthetic crossing events, negotiates geometry and state with
//! the window manager, and lets applications on the same server evaluate
//! scripts in each other (`send`).
//!
//! Everything hangs off a single [`Toolkit`] value.

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod ewmh;
pub mod grab;
pub mod interp;
pub mod props;
pub mod registry;
pub mod send;
pub mod state;
pub mod toolkit;
pub mod tracing;
pub mod types;
pub mod wait;
pub mod window;
pub mod wm;
pub mod words;

pub use command::CommandInterp;
pub use config::Config;
pub use error::{Result, XtkError};
pub use interp::{Interp, InterpId, ScriptError};
pub use registry::{AppId, DisplayId, WindowId};
pub use toolkit::Toolkit;
