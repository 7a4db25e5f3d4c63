//! ICCCM, EWMH and send-protocol atom management.
//!
//! The toolkit talks to window managers through ICCCM/EWMH properties and
//! client messages, and to other applications through the `Comm` and
//! `InterpRegistry` properties. All the fixed atoms are interned once per
//! display connection.

use anyhow::Result;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, ConnectionExt};

/// Atoms used by the toolkit on one display
#[derive(Debug, Clone)]
pub struct Atoms {
    // ICCCM atoms
    pub wm_protocols: Atom,
    pub wm_delete_window: Atom,
    pub wm_state: Atom,
    pub wm_change_state: Atom,
    pub wm_client_machine: Atom,
    pub wm_colormap_windows: Atom,

    // EWMH atoms
    pub net_wm_ping: Atom,
    pub net_wm_name: Atom,
    pub net_wm_icon_name: Atom,
    pub net_wm_icon: Atom,
    pub net_wm_pid: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_above: Atom,
    pub net_wm_state_maximized_vert: Atom,
    pub net_wm_state_maximized_horz: Atom,
    pub net_wm_state_fullscreen: Atom,
    pub net_wm_window_type: Atom,
    pub net_wm_window_opacity: Atom,
    pub utf8_string: Atom,

    // Virtual-root window managers
    pub wm_root: Atom,
    pub swm_root: Atom,

    // Send protocol
    pub comm: Atom,
    pub interp_registry: Atom,
    pub interp_name: Atom,
}

impl Atoms {
    /// Create and intern all required atoms
    pub fn new(conn: &impl Connection) -> Result<Self> {
        Ok(Self {
            wm_protocols: Self::intern(conn, b"WM_PROTOCOLS")?,
            wm_delete_window: Self::intern(conn, b"WM_DELETE_WINDOW")?,
            wm_state: Self::intern(conn, b"WM_STATE")?,
            wm_change_state: Self::intern(conn, b"WM_CHANGE_STATE")?,
            wm_client_machine: Self::intern(conn, b"WM_CLIENT_MACHINE")?,
            wm_colormap_windows: Self::intern(conn, b"WM_COLORMAP_WINDOWS")?,
            net_wm_ping: Self::intern(conn, b"_NET_WM_PING")?,
            net_wm_name: Self::intern(conn, b"_NET_WM_NAME")?,
            net_wm_icon_name: Self::intern(conn, b"_NET_WM_ICON_NAME")?,
            net_wm_icon: Self::intern(conn, b"_NET_WM_ICON")?,
            net_wm_pid: Self::intern(conn, b"_NET_WM_PID")?,
            net_wm_state: Self::intern(conn, b"_NET_WM_STATE")?,
            net_wm_state_above: Self::intern(conn, b"_NET_WM_STATE_ABOVE")?,
            net_wm_state_maximized_vert: Self::intern(conn, b"_NET_WM_STATE_MAXIMIZED_VERT")?,
            net_wm_state_maximized_horz: Self::intern(conn, b"_NET_WM_STATE_MAXIMIZED_HORZ")?,
            net_wm_state_fullscreen: Self::intern(conn, b"_NET_WM_STATE_FULLSCREEN")?,
            net_wm_window_type: Self::intern(conn, b"_NET_WM_WINDOW_TYPE")?,
            net_wm_window_opacity: Self::intern(conn, b"_NET_WM_WINDOW_OPACITY")?,
            utf8_string: Self::intern(conn, b"UTF8_STRING")?,
            wm_root: Self::intern(conn, b"__WM_ROOT")?,
            swm_root: Self::intern(conn, b"__SWM_ROOT")?,
            comm: Self::intern(conn, b"Comm")?,
            interp_registry: Self::intern(conn, b"InterpRegistry")?,
            interp_name: Self::intern(conn, b"TK_APPLICATION")?,
        })
    }

    /// Intern an atom name
    pub fn intern(conn: &impl Connection, name: &[u8]) -> Result<Atom> {
        Ok(conn.intern_atom(false, name)?.reply()?.atom)
    }
}
