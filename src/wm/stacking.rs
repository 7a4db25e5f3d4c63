//! Stacking order of siblings and of toplevels.

use std::collections::HashMap;

use x11rb::protocol::xproto::{
    ConfigWindow, ConfigureRequestEvent, ConfigureWindowAux, ConnectionExt as _, StackMode, Window,
    CONFIGURE_REQUEST_EVENT,
};

use crate::error::{Result, WmError};
use crate::props;
use crate::registry::{WindowFlags, WindowId};
use crate::toolkit::Toolkit;

/// Where to put a window relative to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPosition {
    Above,
    Below,
}

impl StackPosition {
    fn to_x11(self) -> StackMode {
        match self {
            StackPosition::Above => StackMode::ABOVE,
            StackPosition::Below => StackMode::BELOW,
        }
    }
}

/// Toplevels in bottom-to-top order, given the children of the root
/// (bottom first) and which of them are our frames or wrappers
pub fn order_from_tree(children: &[Window], frames: &HashMap<Window, WindowId>) -> Vec<WindowId> {
    children.iter().filter_map(|w| frames.get(w).copied()).collect()
}

/// Move `win` within `siblings` (bottom first) so it sits directly above
/// or below `other`; returns false when `other` is not there
pub fn reorder(siblings: &mut Vec<WindowId>, win: WindowId, position: StackPosition, other: WindowId) -> bool {
    if !siblings.contains(&other) {
        return false;
    }
    siblings.retain(|&s| s != win);
    let Some(at) = siblings.iter().position(|&s| s == other) else {
        return false;
    };
    let at = match position {
        StackPosition::Above => at + 1,
        StackPosition::Below => at,
    };
    siblings.insert(at, win);
    true
}

impl Toolkit {
    /// `raise`: put `win` above `above`, or above all its siblings
    pub fn raise(&mut self, win: WindowId, above: Option<WindowId>) -> Result<()> {
        if self.restack(win, StackPosition::Above, above)? {
            return Ok(());
        }
        Err(WmError::BadValue(format!(
            "can't raise \"{}\" above \"{}\"",
            self.registry.path(win),
            above.map(|a| self.registry.path(a)).unwrap_or_default()
        ))
        .into())
    }

    /// `lower`: put `win` below `below`, or below all its siblings
    pub fn lower(&mut self, win: WindowId, below: Option<WindowId>) -> Result<()> {
        if self.restack(win, StackPosition::Below, below)? {
            return Ok(());
        }
        Err(WmError::BadValue(format!(
            "can't lower \"{}\" below \"{}\"",
            self.registry.path(win),
            below.map(|b| self.registry.path(b)).unwrap_or_default()
        ))
        .into())
    }

    /// Restack `win` relative to `other`; returns false when `other` has no
    /// ancestor among `win`'s siblings
    pub fn restack(&mut self, win: WindowId, position: StackPosition, other: Option<WindowId>) -> Result<bool> {
        let rec = self.registry.get(win).ok_or_else(|| self.no_such_window(win))?;
        if let Some(o) = other {
            if !self.registry.is_alive(o) {
                return Err(self.no_such_window(o));
            }
        }
        if rec.flags.contains(WindowFlags::TOP_HIERARCHY) {
            self.restack_toplevel(win, position, other)?;
            return Ok(true);
        }
        let Some(parent) = rec.parent else {
            return Ok(true);
        };

        let siblings = &self.registry.windows[parent].children;
        let other = match other {
            None => match position {
                StackPosition::Above => siblings.last().copied(),
                StackPosition::Below => siblings.first().copied(),
            },
            Some(mut o) => loop {
                let orec = &self.registry.windows[o];
                if orec.parent == Some(parent) {
                    break Some(o);
                }
                match orec.parent {
                    Some(p) if !orec.flags.contains(WindowFlags::TOP_HIERARCHY) => o = p,
                    _ => return Ok(false),
                }
            },
        };
        let Some(other) = other else {
            return Ok(true);
        };
        if other == win {
            return Ok(true);
        }
        let mut children = std::mem::take(&mut self.registry.windows[parent].children);
        reorder(&mut children, win, position, other);
        self.registry.windows[parent].children = children;

        let Some(xid) = self.registry.windows[win].xid else {
            return Ok(true);
        };
        // Stack just below the next realized sibling, or on top.
        let children = &self.registry.windows[parent].children;
        let next = children
            .iter()
            .skip_while(|&&c| c != win)
            .skip(1)
            .filter_map(|&c| self.registry.get(c))
            .find(|c| !c.flags.intersects(WindowFlags::TOP_HIERARCHY | WindowFlags::REPARENTED))
            .and_then(|c| c.xid);
        let aux = match next {
            Some(sibling) => ConfigureWindowAux::new().sibling(sibling).stack_mode(StackMode::BELOW),
            None => ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        };
        let display = self.registry.windows[win].display;
        self.conn(display)?.conn.configure_window(xid, &aux)?;
        Ok(true)
    }

    /// Restack a toplevel's wrapper through the window manager
    fn restack_toplevel(&mut self, win: WindowId, position: StackPosition, other: Option<WindowId>) -> Result<()> {
        let top = self.registry.toplevel_of(win).unwrap_or(win);
        let Some(wrapper) = self.realize_if_connected(top)? else {
            return Ok(());
        };
        let sibling = match other.and_then(|o| self.registry.toplevel_of(o)) {
            Some(o) => match self.realize_if_connected(o)? {
                Some(w) => Some(w),
                None => return Ok(()),
            },
            None => None,
        };
        let rec = &self.registry.windows[top];
        let root = self.registry.display(rec.display).screen(rec.screen).root;
        let dc = self.conn(rec.display)?;

        let mut aux = ConfigureWindowAux::new().stack_mode(position.to_x11());
        let mut mask = ConfigWindow::STACK_MODE;
        if let Some(sibling) = sibling {
            aux = aux.sibling(sibling);
            mask |= ConfigWindow::SIBLING;
        }
        // A sibling that is not a true sibling of the wrapper fails with
        // BadMatch; the window manager then has to do it for us.
        if let Err(e) = dc.conn.configure_window(wrapper, &aux)?.check() {
            log::debug!("restack of 0x{:x} refused ({:?}); asking the window manager", wrapper, e);
            let request = ConfigureRequestEvent {
                response_type: CONFIGURE_REQUEST_EVENT,
                stack_mode: position.to_x11(),
                sequence: 0,
                parent: root,
                window: wrapper,
                sibling: sibling.unwrap_or(x11rb::NONE),
                x: 0,
                y: 0,
                width: 0,
                height: 0,
                border_width: 0,
                value_mask: mask,
            };
            dc.conn.send_event(false, root, props::wm_request_mask(), request)?;
        }
        Ok(())
    }

    /// `wm stackorder`: mapped toplevels at or below `win`, bottom first
    pub fn stackorder(&self, win: WindowId) -> Result<Vec<WindowId>> {
        let rec = self.registry.get(win).ok_or_else(|| self.no_such_window(win))?;
        let mut frames = HashMap::new();
        for w in std::iter::once(win).chain(self.registry.descendants(win)) {
            let Some(r) = self.registry.get(w) else {
                continue;
            };
            if !r.flags.contains(WindowFlags::TOP_LEVEL) || r.flags.contains(WindowFlags::EMBEDDED) || !r.is_mapped() {
                continue;
            }
            let Some(wm) = r.wm.as_deref() else {
                continue;
            };
            if let Some(frame) = wm.reparent.or_else(|| self.wrapper_xid(w)) {
                frames.insert(frame, w);
            }
        }
        if frames.is_empty() {
            return Ok(Vec::new());
        }
        let root = self
            .registry
            .wm(win)
            .and_then(|wm| wm.vroot)
            .unwrap_or_else(|| self.registry.display(rec.display).screen(rec.screen).root);
        let dc = self.conn(rec.display)?;
        let tree = dc.conn.query_tree(root)?.reply()?;
        Ok(order_from_tree(&tree.children, &frames))
    }

    /// `wm stackorder a isabove b`
    pub fn is_above(&self, win: WindowId, other: WindowId) -> Result<bool> {
        let (a, b) = self.stack_indices(win, other)?;
        Ok(a > b)
    }

    /// `wm stackorder a isbelow b`
    pub fn is_below(&self, win: WindowId, other: WindowId) -> Result<bool> {
        let (a, b) = self.stack_indices(win, other)?;
        Ok(a < b)
    }

    fn stack_indices(&self, win: WindowId, other: WindowId) -> Result<(usize, usize)> {
        for w in [win, other] {
            self.require_toplevel(w)?;
            if !self.registry.windows[w].is_mapped() {
                return Err(WmError::BadValue(format!("window \"{}\" isn't mapped", self.registry.path(w))).into());
            }
        }
        let main = self.registry.windows[win]
            .app
            .and_then(|a| self.registry.apps[a].main_window)
            .unwrap_or(win);
        let order = self.stackorder(main)?;
        let index = |w: WindowId| {
            order.iter().position(|&o| o == w).ok_or_else(|| {
                WmError::BadValue(format!(
                    "window \"{}\" isn't in the stacking order",
                    self.registry.path(w)
                ))
            })
        };
        Ok((index(win)?, index(other)?))
    }
}
