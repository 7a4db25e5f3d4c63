//! Extended window-manager attributes: opacity, stay-on-top, maximized,
//! fullscreen and window type.
//!
//! What the application asked for is kept separately from what the window
//! manager last reported through `_NET_WM_STATE`; the request is written as
//! a property before the first map and sent as a client message after it.

use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as _, PropMode};
use x11rb::wrapper::ConnectionExt as _;

use super::WmFlags;
use crate::error::{Result, WmError};
use crate::ewmh::Atoms;
use crate::props;
use crate::registry::WindowId;
use crate::toolkit::Toolkit;

/// Attribute values of a toplevel
#[derive(Debug, Clone, PartialEq)]
pub struct WmAttributes {
    pub topmost: bool,
    pub zoomed: bool,
    pub fullscreen: bool,
    /// Opacity from 0.0 to 1.0
    pub alpha: f64,
}

impl Default for WmAttributes {
    fn default() -> Self {
        Self {
            topmost: false,
            zoomed: false,
            fullscreen: false,
            alpha: 1.0,
        }
    }
}

/// One `wm attributes` setting
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Alpha(f64),
    Topmost(bool),
    Zoomed(bool),
    Fullscreen(bool),
    Type(Vec<String>),
}

impl Attribute {
    /// Parse an option/value pair such as `-alpha 0.5`
    pub fn parse(option: &str, value: &str) -> std::result::Result<Self, WmError> {
        let flag = || parse_bool(value).ok_or_else(|| WmError::BadValue(format!("expected boolean value but got \"{}\"", value)));
        Ok(match option {
            "-alpha" => Attribute::Alpha(
                value
                    .parse()
                    .map_err(|_| WmError::BadValue(format!("expected floating-point number but got \"{}\"", value)))?,
            ),
            "-topmost" => Attribute::Topmost(flag()?),
            "-zoomed" => Attribute::Zoomed(flag()?),
            "-fullscreen" => Attribute::Fullscreen(flag()?),
            "-type" => Attribute::Type(value.split_whitespace().map(str::to_string).collect()),
            other => {
                return Err(WmError::BadValue(format!(
                    "bad attribute \"{}\": must be -alpha, -topmost, -zoomed, -fullscreen, or -type",
                    other
                )))
            }
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Atoms of the `_NET_WM_STATE` values we track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetStateAtoms {
    pub above: Atom,
    pub maximized_vert: Atom,
    pub maximized_horz: Atom,
    pub fullscreen: Atom,
}

impl From<&Atoms> for NetStateAtoms {
    fn from(atoms: &Atoms) -> Self {
        Self {
            above: atoms.net_wm_state_above,
            maximized_vert: atoms.net_wm_state_maximized_vert,
            maximized_horz: atoms.net_wm_state_maximized_horz,
            fullscreen: atoms.net_wm_state_fullscreen,
        }
    }
}

impl WmAttributes {
    /// Take the state flags from a `_NET_WM_STATE` value; zoomed needs
    /// both maximized directions
    pub fn apply_net_wm_state(&mut self, state: &[Atom], atoms: &NetStateAtoms) {
        self.topmost = state.contains(&atoms.above);
        self.zoomed = state.contains(&atoms.maximized_vert) && state.contains(&atoms.maximized_horz);
        self.fullscreen = state.contains(&atoms.fullscreen);
    }

    /// `_NET_WM_STATE` value describing these attributes
    pub fn net_wm_state(&self, atoms: &NetStateAtoms) -> Vec<Atom> {
        let mut state = Vec::new();
        if self.topmost {
            state.push(atoms.above);
        }
        if self.zoomed {
            state.push(atoms.maximized_vert);
            state.push(atoms.maximized_horz);
        }
        if self.fullscreen {
            state.push(atoms.fullscreen);
        }
        state
    }
}

/// `_NET_WM_WINDOW_OPACITY` value for an alpha; `None` means fully opaque
pub fn opacity(alpha: f64) -> Option<u32> {
    if alpha >= 1.0 {
        None
    } else {
        Some((f64::from(u32::MAX) * alpha.max(0.0)) as u32)
    }
}

/// Atom name for a window type such as `dialog`
pub fn window_type_atom_name(name: &str) -> String {
    format!("_NET_WM_WINDOW_TYPE_{}", name.to_ascii_uppercase())
}

impl Toolkit {
    /// `wm attributes`: requested values
    pub fn attributes(&self, win: WindowId) -> Result<WmAttributes> {
        Ok(self.wm(win)?.req_state.clone())
    }

    /// `wm attributes -type`
    pub fn window_type(&self, win: WindowId) -> Result<Vec<String>> {
        Ok(self.wm(win)?.window_type.clone())
    }

    /// `wm attributes`: change one attribute
    pub fn set_attribute(&mut self, win: WindowId, attribute: Attribute) -> Result<()> {
        let wm = self.wm_mut(win)?;
        match attribute {
            Attribute::Alpha(alpha) => {
                let alpha = alpha.clamp(0.0, 1.0);
                wm.req_state.alpha = alpha;
                wm.attributes.alpha = alpha;
                self.push_opacity(win)
            }
            Attribute::Type(types) => {
                wm.window_type = types;
                self.push_window_type(win)
            }
            Attribute::Topmost(on) => {
                wm.req_state.topmost = on;
                self.request_net_wm_state(win, |a| [a.above, 0], on)
            }
            Attribute::Zoomed(on) => {
                wm.req_state.zoomed = on;
                self.request_net_wm_state(win, |a| [a.maximized_vert, a.maximized_horz], on)
            }
            Attribute::Fullscreen(on) => {
                wm.req_state.fullscreen = on;
                self.request_net_wm_state(win, |a| [a.fullscreen, 0], on)
            }
        }
    }

    /// Ask the window manager to add or remove state atoms. Before the
    /// window is mapped the property itself is rewritten instead.
    fn request_net_wm_state(&mut self, top: WindowId, which: fn(&NetStateAtoms) -> [Atom; 2], on: bool) -> Result<()> {
        let mapped = self.registry.windows[top].is_mapped();
        if !mapped {
            return self.flush_req_state(top);
        }
        let rec = &self.registry.windows[top];
        let root = self.registry.display(rec.display).screen(rec.screen).root;
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        let atoms = NetStateAtoms::from(&dc.atoms);
        let [first, second] = which(&atoms);
        // Source indication 1: a normal application
        let data = [u32::from(on), first, second, 1, 0];
        props::send_client_message(
            &dc.conn,
            root,
            wrapper,
            dc.atoms.net_wm_state,
            data,
            props::wm_request_mask(),
        )?;
        Ok(())
    }

    /// Write the requested state, type and opacity as properties; used
    /// while the window manager is not looking at the wrapper
    pub(crate) fn flush_req_state(&mut self, top: WindowId) -> Result<()> {
        let Some(wm) = self.registry.wm(top) else {
            return Ok(());
        };
        let req = wm.req_state.clone();
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        let state = req.net_wm_state(&NetStateAtoms::from(&dc.atoms));
        dc.conn
            .change_property32(PropMode::REPLACE, wrapper, dc.atoms.net_wm_state, AtomEnum::ATOM, &state)?;
        self.push_window_type(top)?;
        self.push_opacity(top)
    }

    fn push_opacity(&mut self, top: WindowId) -> Result<()> {
        let alpha = self.wm(top)?.req_state.alpha;
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        match opacity(alpha) {
            Some(value) => {
                dc.conn.change_property32(
                    PropMode::REPLACE,
                    wrapper,
                    dc.atoms.net_wm_window_opacity,
                    AtomEnum::CARDINAL,
                    &[value],
                )?;
            }
            None => {
                dc.conn.delete_property(wrapper, dc.atoms.net_wm_window_opacity)?;
            }
        }
        Ok(())
    }

    fn push_window_type(&mut self, top: WindowId) -> Result<()> {
        let types = self.wm(top)?.window_type.clone();
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        if types.is_empty() {
            dc.conn.delete_property(wrapper, dc.atoms.net_wm_window_type)?;
            return Ok(());
        }
        let mut atoms = Vec::with_capacity(types.len());
        for name in &types {
            atoms.push(Atoms::intern(&dc.conn, window_type_atom_name(name).as_bytes())?);
        }
        dc.conn
            .change_property32(PropMode::REPLACE, wrapper, dc.atoms.net_wm_window_type, AtomEnum::ATOM, &atoms)?;
        Ok(())
    }

    /// The window manager rewrote `_NET_WM_STATE` on the wrapper
    pub(crate) fn net_wm_state_changed(&mut self, top: WindowId) -> Result<()> {
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        let state = props::get_atoms(&dc.conn, wrapper, dc.atoms.net_wm_state)?;
        let atoms = NetStateAtoms::from(&dc.atoms);
        let wm = self.wm_mut(top)?;
        wm.attributes.apply_net_wm_state(&state, &atoms);
        wm.req_state = wm.attributes.clone();
        log::debug!("window manager state of {:?}: {:?}", top, wm.attributes);
        let flags = wm.flags;
        if !(wm.attributes.zoomed || wm.attributes.fullscreen) && flags.contains(WmFlags::MOVE_PENDING) {
            self.schedule_geometry_update(top);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::tests::detached;

    const ATOMS: NetStateAtoms = NetStateAtoms {
        above: 10,
        maximized_vert: 11,
        maximized_horz: 12,
        fullscreen: 13,
    };

    #[test]
    fn test_state_from_property() {
        let mut attrs = WmAttributes::default();
        attrs.apply_net_wm_state(&[10, 11, 99], &ATOMS);
        assert!(attrs.topmost);
        assert!(!attrs.zoomed, "one maximized direction is not zoomed");
        attrs.apply_net_wm_state(&[11, 12, 13], &ATOMS);
        assert!(!attrs.topmost);
        assert!(attrs.zoomed);
        assert!(attrs.fullscreen);
        assert_eq!(attrs.net_wm_state(&ATOMS), vec![11, 12, 13]);
    }

    #[test]
    fn test_opacity_values() {
        assert_eq!(opacity(1.0), None);
        assert_eq!(opacity(0.0), Some(0));
        assert_eq!(opacity(0.5), Some(0x7fff_ffff));
    }

    #[test]
    fn test_parse_attributes() {
        assert_eq!(Attribute::parse("-alpha", "0.25").unwrap(), Attribute::Alpha(0.25));
        assert_eq!(Attribute::parse("-topmost", "yes").unwrap(), Attribute::Topmost(true));
        assert_eq!(
            Attribute::parse("-type", "dialog utility").unwrap(),
            Attribute::Type(vec!["dialog".into(), "utility".into()])
        );
        assert!(Attribute::parse("-zoomed", "maybe").is_err());
        assert!(Attribute::parse("-sticky", "1").is_err());
        assert_eq!(window_type_atom_name("dialog"), "_NET_WM_WINDOW_TYPE_DIALOG");
    }

    #[test]
    fn test_requested_attributes_before_map() {
        let (mut tk, _, _, main) = detached();
        tk.set_attribute(main, Attribute::Alpha(1.5)).unwrap();
        tk.set_attribute(main, Attribute::Topmost(true)).unwrap();
        tk.set_attribute(main, Attribute::Type(vec!["splash".into()])).unwrap();
        let attrs = tk.attributes(main).unwrap();
        assert_eq!(attrs.alpha, 1.0);
        assert!(attrs.topmost);
        assert_eq!(tk.window_type(main).unwrap(), vec!["splash".to_string()]);
        // Nothing is reported by the window manager yet.
        assert!(!tk.wm(main).unwrap().attributes.topmost);
    }
}
