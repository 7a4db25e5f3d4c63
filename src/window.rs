//! `winfo`-style introspection of windows, screens and atoms.

use x11rb::errors::ReplyError;
use x11rb::protocol::xproto::{Atom, ConnectionExt as _};

use crate::error::{Result, WmError, XtkError};
use crate::ewmh::Atoms;
use crate::registry::{WindowFlags, WindowId};
use crate::toolkit::Toolkit;
use crate::types::Rect;

/// Virtual-root geometry seen by a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VRoot {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Toolkit {
    fn record(&self, win: WindowId) -> Result<&crate::registry::WindowRecord> {
        self.registry
            .get(win)
            .filter(|_| self.registry.is_alive(win))
            .ok_or_else(|| self.no_such_window(win))
    }

    /// Size and position in the parent
    pub fn window_geometry(&self, win: WindowId) -> Result<Rect> {
        let c = &self.record(win)?.changes;
        Ok(Rect::new(c.x, c.y, c.width, c.height))
    }

    /// `winfo geometry`: `WxH+X+Y`
    pub fn geometry_string(&self, win: WindowId) -> Result<String> {
        let r = self.window_geometry(win)?;
        Ok(format!("{}x{}+{}+{}", r.width, r.height, r.x, r.y))
    }

    /// `winfo reqwidth`/`reqheight`
    pub fn requested_size(&self, win: WindowId) -> Result<(i32, i32)> {
        let rec = self.record(win)?;
        Ok((rec.req_width, rec.req_height))
    }

    /// `winfo rootx`/`rooty`
    pub fn root_coords(&self, win: WindowId) -> Result<(i32, i32)> {
        self.record(win)?;
        Ok(self.registry.root_position(win))
    }

    /// `winfo vrootx` and friends: the virtual root of `win`'s toplevel, or
    /// the whole screen when there is none
    pub fn vroot_geometry(&self, win: WindowId) -> Result<VRoot> {
        let rec = self.record(win)?;
        let screen = self.registry.display(rec.display).screen(rec.screen);
        let wm = self.registry.toplevel_of(win).and_then(|t| self.registry.wm(t));
        Ok(match wm {
            Some(wm) if wm.vroot.is_some() => VRoot {
                x: wm.vroot_x,
                y: wm.vroot_y,
                width: wm.vroot_width,
                height: wm.vroot_height,
            },
            _ => VRoot {
                x: 0,
                y: 0,
                width: screen.width,
                height: screen.height,
            },
        })
    }

    /// `winfo screenwidth`, `screenheight`, `screenmmwidth`, `screenmmheight`
    pub fn screen_metrics(&self, win: WindowId) -> Result<(i32, i32, i32, i32)> {
        let rec = self.record(win)?;
        let s = self.registry.display(rec.display).screen(rec.screen);
        Ok((s.width, s.height, s.width_mm, s.height_mm))
    }

    /// `winfo screendepth`
    pub fn screen_depth(&self, win: WindowId) -> Result<u8> {
        let rec = self.record(win)?;
        Ok(self.registry.display(rec.display).screen(rec.screen).root_depth)
    }

    /// `winfo pointerxy`: pointer position on `win`'s screen, `(-1, -1)`
    /// when it is on another screen
    pub fn pointer_xy(&self, win: WindowId) -> Result<(i32, i32)> {
        let rec = self.record(win)?;
        let root = self.registry.display(rec.display).screen(rec.screen).root;
        let dc = self.conn(rec.display)?;
        let reply = dc.conn.query_pointer(root)?.reply()?;
        if !reply.same_screen {
            return Ok((-1, -1));
        }
        Ok((i32::from(reply.root_x), i32::from(reply.root_y)))
    }

    /// `winfo atom`: intern `name` on `win`'s display
    pub fn atom(&self, win: WindowId, name: &str) -> Result<Atom> {
        let rec = self.record(win)?;
        let dc = self.conn(rec.display)?;
        Ok(Atoms::intern(&dc.conn, name.as_bytes())?)
    }

    /// `winfo atomname`
    pub fn atom_name(&self, win: WindowId, atom: Atom) -> Result<String> {
        let rec = self.record(win)?;
        let dc = self.conn(rec.display)?;
        match dc.conn.get_atom_name(atom)?.reply() {
            Ok(reply) => Ok(String::from_utf8_lossy(&reply.name).into_owned()),
            Err(ReplyError::X11Error(_)) => Err(WmError::BadValue(format!("no atom exists with id \"{}\"", atom)).into()),
            Err(e) => Err(e.into()),
        }
    }

    /// `winfo exists`
    pub fn exists(&self, win: WindowId) -> bool {
        self.registry.is_alive(win)
    }

    /// `winfo ismapped`
    pub fn is_mapped(&self, win: WindowId) -> Result<bool> {
        Ok(self.record(win)?.is_mapped())
    }

    /// `winfo viewable`: `win` and every ancestor up to its toplevel are
    /// mapped
    pub fn is_viewable(&self, win: WindowId) -> Result<bool> {
        let mut cur = Some(win);
        while let Some(w) = cur {
            if !self.record(w)?.is_mapped() {
                return Ok(false);
            }
            cur = self.registry.hierarchy_parent(w);
        }
        Ok(true)
    }

    /// `winfo children`: named children, bottom of the stacking order first
    pub fn children(&self, win: WindowId) -> Result<Vec<WindowId>> {
        Ok(self
            .record(win)?
            .children
            .iter()
            .copied()
            .filter(|&c| self.registry.get(c).is_some_and(|r| r.path.is_some()))
            .collect())
    }

    /// `winfo parent`
    pub fn parent(&self, win: WindowId) -> Result<Option<WindowId>> {
        Ok(self.record(win)?.parent)
    }

    /// `winfo toplevel`
    pub fn toplevel(&self, win: WindowId) -> Result<WindowId> {
        self.record(win)?;
        self.registry.toplevel_of(win).ok_or_else(|| self.no_such_window(win))
    }

    /// `winfo id`: the protocol id, creating the window if needed
    pub fn window_id(&mut self, win: WindowId) -> Result<u32> {
        self.record(win)?;
        self.make_exist(win)
    }

    /// `winfo name`
    pub fn window_name(&self, win: WindowId) -> Result<String> {
        Ok(self.record(win)?.name.clone().unwrap_or_default())
    }

    /// `winfo class`
    pub fn window_class(&self, win: WindowId) -> Result<String> {
        Ok(self.record(win)?.class.clone().unwrap_or_default())
    }

    /// Give a window a class name
    pub fn set_window_class(&mut self, win: WindowId, class: &str) -> Result<()> {
        if !self.registry.is_alive(win) {
            return Err(self.no_such_window(win));
        }
        self.registry.windows[win].class = Some(class.to_string());
        if self.registry.windows[win].flags.contains(WindowFlags::TOP_LEVEL) {
            self.push_class(win)?;
        }
        Ok(())
    }

    /// `winfo interps` on the display of `win`
    pub fn interps_of(&self, win: WindowId) -> Result<Vec<String>> {
        let display = self.record(win)?.display;
        self.interps(display)
    }

    /// Look a window up by path within the application of `relative_to`
    pub fn resolve_path(&self, relative_to: WindowId, path: &str) -> Result<WindowId> {
        let app = self
            .registry
            .get(relative_to)
            .and_then(|r| r.app)
            .ok_or(XtkError::AppDestroyed)?;
        self.window_by_path(app, path)
    }
}
