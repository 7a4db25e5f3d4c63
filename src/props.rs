//! Window property helpers.
//!
//! Stateless functions for reading and writing the X properties and client
//! messages the window-manager and send layers exchange.

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::wrapper::ConnectionExt as _;

/// Read a list of atoms; empty if absent
pub fn get_atoms(conn: &impl Connection, window: Window, atom: Atom) -> Result<Vec<Atom>> {
    let reply = conn
        .get_property(false, window, atom, AtomEnum::ATOM, 0, 1024)?
        .reply()?;
    Ok(reply.value32().map(|v| v.collect()).unwrap_or_default())
}

/// Read a single window id, e.g. a virtual root
pub fn get_window(conn: &impl Connection, window: Window, atom: Atom) -> Result<Option<Window>> {
    let reply = conn
        .get_property(false, window, atom, AtomEnum::WINDOW, 0, 1)?
        .reply()?;
    if reply.type_ != u32::from(AtomEnum::WINDOW) {
        return Ok(None);
    }
    Ok(reply.value32().and_then(|mut v| v.next()))
}

/// Read the raw bytes of an 8-bit property of type STRING, optionally
/// deleting it in the same request. `None` if it is absent or of another
/// type or format.
pub fn get_bytes(conn: &impl Connection, window: Window, atom: Atom, delete: bool) -> Result<Option<Vec<u8>>> {
    let reply = conn
        .get_property(delete, window, atom, AtomEnum::STRING, 0, u32::MAX / 4)?
        .reply()
        .with_context(|| format!("reading property {} of 0x{:x}", atom, window))?;
    if reply.type_ != u32::from(AtomEnum::STRING) || reply.format != 8 {
        return Ok(None);
    }
    Ok(Some(reply.value))
}

/// Write a Latin-1 `STRING` property
pub fn set_string(conn: &impl Connection, window: Window, atom: impl Into<Atom>, value: &str) -> Result<()> {
    let bytes: Vec<u8> = value
        .chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect();
    conn.change_property8(PropMode::REPLACE, window, atom, AtomEnum::STRING, &bytes)?;
    Ok(())
}

/// Write a `UTF8_STRING` property
pub fn set_utf8(conn: &impl Connection, window: Window, atom: Atom, utf8_string: Atom, value: &str) -> Result<()> {
    conn.change_property8(PropMode::REPLACE, window, atom, utf8_string, value.as_bytes())?;
    Ok(())
}

/// Send a 32-bit client message about `window` to `destination`
pub fn send_client_message(
    conn: &impl Connection,
    destination: Window,
    window: Window,
    type_: Atom,
    data: [u32; 5],
    mask: EventMask,
) -> Result<()> {
    let event = ClientMessageEvent::new(32, window, type_, data);
    conn.send_event(false, destination, mask, event)?;
    Ok(())
}

/// Mask used for requests addressed to the window manager through the root
pub fn wm_request_mask() -> EventMask {
    EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY
}

/// Look up the name of an atom
pub fn atom_name(conn: &impl Connection, atom: Atom) -> Result<String> {
    let reply = conn.get_atom_name(atom)?.reply()?;
    Ok(String::from_utf8_lossy(&reply.name).into_owned())
}
