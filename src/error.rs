//! Error types for the toolkit core.
//!
//! Validation failures are typed so callers can match on them; everything
//! that talks to the X server propagates through `anyhow` with context.

use thiserror::Error;

/// Failures of [`crate::registry::Registry::name`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// Names starting with an upper-case letter are reserved for classes
    #[error("window name starts with an upper-case letter: \"{0}\"")]
    UpperCase(String),
    #[error("window name \"{name}\" already exists in parent")]
    AlreadyExists { name: String },
    #[error("window already has a name")]
    AlreadyNamed,
    #[error("parent window is not named")]
    AnonymousParent,
}

/// Failures of a pointer/keyboard grab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GrabError {
    #[error("grab failed: window not viewable")]
    Unviewable,
    #[error("grab failed: another application has grab")]
    AlreadyGrabbed,
    #[error("grab failed: keyboard or pointer frozen")]
    Frozen,
    #[error("grab failed: invalid time")]
    InvalidTime,
    #[error("grab failed for unknown reason (code {0})")]
    Unknown(u8),
}

impl GrabError {
    /// Translate a `GrabStatus` reply into an error, `None` on success
    pub fn from_status(status: x11rb::protocol::xproto::GrabStatus) -> Option<Self> {
        use x11rb::protocol::xproto::GrabStatus;
        match status {
            GrabStatus::SUCCESS => None,
            GrabStatus::NOT_VIEWABLE => Some(GrabError::Unviewable),
            GrabStatus::ALREADY_GRABBED => Some(GrabError::AlreadyGrabbed),
            GrabStatus::FROZEN => Some(GrabError::Frozen),
            GrabStatus::INVALID_TIME => Some(GrabError::InvalidTime),
            other => Some(GrabError::Unknown(u8::from(other))),
        }
    }
}

/// Failures of window-manager configuration requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WmError {
    #[error("window \"{0}\" isn't a top-level window")]
    NotToplevel(String),
    #[error("setting \"{master}\" as master creates a transient/master cycle")]
    TransientCycle { master: String },
    #[error("can't make \"{0}\" its own master")]
    SelfMaster(String),
    #[error("bad geometry specifier \"{0}\"")]
    BadGeometry(String),
    #[error("{0}")]
    BadValue(String),
    #[error("can't iconify \"{0}\": it is an icon for another window")]
    IsIcon(String),
}

/// Failures of the inter-application send layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("no application named \"{0}\"")]
    NoApplication(String),
    #[error("target application died")]
    TargetDied,
    #[error("target application died or uses a Tk version before 4.0")]
    TargetDiedOrOld,
    #[error("X server insecure (must use xauth-style authorization); command ignored")]
    Insecure,
    #[error("send is not available: application is not registered")]
    NotRegistered,
}

/// Umbrella error for toolkit operations
#[derive(Debug, Error)]
pub enum XtkError {
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Grab(#[from] GrabError),
    #[error(transparent)]
    Wm(#[from] WmError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("bad window path name \"{0}\"")]
    NoSuchWindow(String),
    #[error("display \"{0}\" has no server connection")]
    NotConnected(String),
    #[error("operation canceled")]
    Canceled,
    #[error("application has been destroyed")]
    AppDestroyed,
    #[error(transparent)]
    X11(#[from] anyhow::Error),
}

impl From<x11rb::errors::ConnectionError> for XtkError {
    fn from(e: x11rb::errors::ConnectionError) -> Self {
        XtkError::X11(e.into())
    }
}

impl From<x11rb::errors::ReplyError> for XtkError {
    fn from(e: x11rb::errors::ReplyError) -> Self {
        XtkError::X11(e.into())
    }
}

impl From<x11rb::errors::ReplyOrIdError> for XtkError {
    fn from(e: x11rb::errors::ReplyOrIdError) -> Self {
        XtkError::X11(e.into())
    }
}

pub type Result<T, E = XtkError> = std::result::Result<T, E>;
