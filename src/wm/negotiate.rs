//! Map, withdraw, iconify and geometry round trips with the window manager.
//!
//! Every toplevel lives inside a wrapper window that the window manager
//! sees as the client. Geometry changes are requested on the wrapper and
//! confirmed by the ConfigureNotify that comes back; the frame the manager
//! reparents the wrapper into is tracked so positions can be reported the
//! way the user sees them.

use x11rb::protocol::xproto::{
    ConfigureNotifyEvent, ConfigureWindowAux, ConnectionExt, EventMask, NotifyDetail, ReparentNotifyEvent,
    UnmapNotifyEvent, Window, UNMAP_NOTIFY_EVENT,
};
use x11rb::protocol::Event;

use super::{WmFlags, WmInfo};
use crate::error::{Result, WmError};
use crate::event::{CrossingDetail, WindowEvent};
use crate::props;
use crate::registry::{WindowFlags, WindowId};
use crate::state::{StateTransition, WmState};
use crate::toolkit::{window_event_mask, Toolkit};
use crate::types::Changes;
use crate::wait::WaitFor;

/// What a geometry reconciliation has to ask of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryAction {
    Unchanged,
    /// Move and resize the wrapper; a new position was requested
    MoveResize { x: i32, y: i32, width: i32, height: i32 },
    /// Resize the wrapper in place
    Resize { width: i32, height: i32 },
    /// Size is right but the menubar strip must be laid out again
    ResizeMenubar { width: i32, height: i32 },
}

/// Outcome of [`WmInfo::plan_geometry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryPlan {
    /// Content size the window should have
    pub width: i32,
    pub height: i32,
    /// Size hints must be rewritten before the request goes out
    pub update_hints: bool,
    pub action: GeometryAction,
}

/// Geometry of the window manager's frame around the wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub border_width: i32,
    /// Offset of the wrapper's outer corner inside the frame
    pub x_in_parent: i32,
    pub y_in_parent: i32,
}

/// Walk up from `start` to the ancestor whose parent is `root`.
///
/// `parent_of` answers one tree query; `None` from it aborts the walk.
pub fn frame_below_root(mut parent_of: impl FnMut(Window) -> Option<Window>, start: Window, root: Window) -> Option<Window> {
    if start == root {
        return None;
    }
    let mut ancestor = start;
    loop {
        let parent = parent_of(ancestor)?;
        if parent == root {
            return Some(ancestor);
        }
        ancestor = parent;
    }
}

impl WmInfo {
    /// Decide how to bring the wrapper in line with the requested geometry.
    ///
    /// `current` is the toplevel's geometry as last confirmed. Flags that
    /// the plan consumes are cleared, and the configured size is recorded
    /// for every request the plan issues.
    pub fn plan_geometry(&mut self, req_width: i32, req_height: i32, current: &Changes, menubar_stale: bool) -> GeometryPlan {
        let (width, height) = self.target_size(req_width, req_height);
        let update_hints = self.flags.contains(WmFlags::UPDATE_SIZE_HINTS)
            || self.size_change_needs_hints(width, height, current);
        self.flags.remove(WmFlags::UPDATE_SIZE_HINTS);
        let mut plan = GeometryPlan {
            width,
            height,
            update_hints,
            action: GeometryAction::Unchanged,
        };
        if self.attributes.zoomed || self.attributes.fullscreen {
            self.flags.remove(WmFlags::MOVE_PENDING);
            return plan;
        }

        let (x, y) = self.target_position(width, height, current);
        let wrapper_height = height + self.menu_height;
        if self.flags.contains(WmFlags::MOVE_PENDING) {
            if x + self.x_in_parent == current.x
                && y + self.y_in_parent + self.menu_height == current.y
                && width == current.width
                && height == current.height
            {
                self.flags.remove(WmFlags::MOVE_PENDING);
                return plan;
            }
            self.config_width = width;
            self.config_height = height;
            plan.action = GeometryAction::MoveResize {
                x,
                y,
                width,
                height: wrapper_height,
            };
        } else if width != self.config_width || height != self.config_height {
            if width == current.width && height == current.height {
                return plan;
            }
            self.config_width = width;
            self.config_height = height;
            plan.action = GeometryAction::Resize {
                width,
                height: wrapper_height,
            };
        } else if menubar_stale {
            plan.action = GeometryAction::ResizeMenubar {
                width,
                height: wrapper_height,
            };
        }
        plan
    }

    /// Take in the frame geometry the window manager gave the wrapper.
    /// `content` is the toplevel's current geometry; the user-visible
    /// position is only updated when no move of ours is outstanding.
    pub fn apply_frame(&mut self, frame: &FrameGeometry, wrapper: &mut Changes, content: &Changes) {
        self.x_in_parent = frame.x_in_parent;
        self.y_in_parent = frame.y_in_parent;
        self.parent_width = frame.width + 2 * frame.border_width;
        self.parent_height = frame.height + 2 * frame.border_width;
        wrapper.x = frame.x + self.x_in_parent;
        wrapper.y = frame.y + self.y_in_parent;
        let moved = content.x != wrapper.x || content.y != wrapper.y + self.menu_height;
        if !self.flags.contains(WmFlags::MOVE_PENDING) && moved {
            self.x = self.user_x(frame.x);
            self.y = self.user_y(frame.y);
        }
    }

    /// Take in a ConfigureNotify on the wrapper and return the toplevel's
    /// new geometry.
    ///
    /// Size changes that did not come from our own request are remembered
    /// as the user's choice, in grid units when gridded. `frame` is the
    /// reparenting frame if the window manager has one.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_configure(
        &mut self,
        event: &Changes,
        frame: Option<&FrameGeometry>,
        wrapper: &mut Changes,
        content: &Changes,
        req_width: i32,
        req_height: i32,
        embedded: bool,
    ) -> Changes {
        let size_changed = wrapper.width != event.width || wrapper.height != event.height;
        if size_changed && !self.flags.contains(WmFlags::SYNC_PENDING) {
            let content_height = event.height - self.menu_height;
            if self.width != -1 || event.width != req_width {
                self.width = if embedded {
                    -1
                } else if self.grid_win.is_some() {
                    (self.req_grid_width + (event.width - req_width) / self.width_inc).max(0)
                } else {
                    event.width
                };
            }
            if self.height != -1 || content_height != req_height {
                self.height = if embedded {
                    -1
                } else if self.grid_win.is_some() {
                    (self.req_grid_height + (content_height - req_height) / self.height_inc).max(0)
                } else {
                    content_height
                };
            }
            self.config_width = event.width;
            self.config_height = content_height;
        }

        wrapper.width = event.width;
        wrapper.height = event.height;
        wrapper.border_width = event.border_width;
        match frame {
            Some(frame) => self.apply_frame(frame, wrapper, content),
            None => {
                self.parent_width = event.width + 2 * event.border_width;
                self.parent_height = event.height + 2 * event.border_width;
                wrapper.x = event.x;
                wrapper.y = event.y;
                self.x = self.user_x(event.x);
                self.y = self.user_y(event.y);
            }
        }
        if self.flags.contains(WmFlags::SYNC_PENDING) {
            self.flags.remove(WmFlags::MOVE_PENDING);
        }
        Changes {
            x: wrapper.x,
            y: wrapper.y + self.menu_height,
            width: wrapper.width,
            height: (wrapper.height - self.menu_height).max(1),
            border_width: content.border_width,
        }
    }

    /// Frame position as the user specified it: measured from the far
    /// edge of the virtual root when anchored there
    fn user_x(&self, frame_x: i32) -> i32 {
        if self.flags.contains(WmFlags::NEGATIVE_X) {
            self.vroot_width - (frame_x + self.parent_width)
        } else {
            frame_x
        }
    }

    fn user_y(&self, frame_y: i32) -> i32 {
        if self.flags.contains(WmFlags::NEGATIVE_Y) {
            self.vroot_height - (frame_y + self.parent_height)
        } else {
            frame_y
        }
    }

    /// Forget the frame; the wrapper sits directly on the (virtual) root
    pub fn clear_reparent(&mut self, wrapper: &Changes) {
        self.reparent = None;
        self.parent_width = wrapper.width + 2 * wrapper.border_width;
        self.parent_height = wrapper.height + 2 * wrapper.border_width;
        self.x_in_parent = 0;
        self.y_in_parent = 0;
    }
}

impl Toolkit {
    /// Server id of a toplevel's wrapper, if it exists yet
    pub(crate) fn wrapper_xid(&self, top: WindowId) -> Option<Window> {
        let wrapper = self.registry.wm(top)?.wrapper?;
        self.registry.get(wrapper)?.xid
    }

    /// Create the wrapper of `top` on the server if it does not exist
    pub(crate) fn ensure_wrapper(&mut self, top: WindowId) -> Result<Window> {
        if let Some(xid) = self.wrapper_xid(top) {
            return Ok(xid);
        }
        let rec = self.registry.get(top).ok_or_else(|| self.no_such_window(top))?;
        let (display, screen, flags, container, changes) =
            (rec.display, rec.screen, rec.flags, rec.container, rec.changes);
        self.conn(display)?;
        let wm = self.wm(top)?;
        let (menu_height, menubar, existing) = (wm.menu_height, wm.menubar, wm.wrapper);

        let parent_xid = match container {
            Some(container) if flags.contains(WindowFlags::EMBEDDED) => self.make_exist(container)?,
            _ => self.registry.display(display).screen(screen).root,
        };
        let wrapper = match existing {
            Some(w) => w,
            None => {
                let w = self
                    .registry
                    .create_anonymous(top, WindowFlags::WRAPPER | WindowFlags::TOP_HIERARCHY);
                self.wm_mut(top)?.wrapper = Some(w);
                w
            }
        };
        if let Some(wrec) = self.registry.get_mut(wrapper) {
            wrec.changes = Changes {
                x: changes.x,
                y: changes.y - menu_height,
                width: changes.width,
                height: changes.height + menu_height,
                border_width: 0,
            };
        }
        let xid = self.create_x_window(
            wrapper,
            parent_xid,
            EventMask::STRUCTURE_NOTIFY
                | EventMask::FOCUS_CHANGE
                | EventMask::PROPERTY_CHANGE
                | EventMask::KEY_PRESS
                | EventMask::KEY_RELEASE,
        )?;
        log::debug!("wrapper 0x{:x} for {}", xid, self.registry.path(top));
        self.push_pid(top)?;
        if let Some(menubar) = menubar {
            self.realize_menubar(top, menubar)?;
        }
        Ok(xid)
    }

    fn trace_state(&mut self, top: WindowId, from: WmState, to: WmState) {
        if from == to {
            return;
        }
        let window = self.wrapper_xid(top).unwrap_or(0);
        self.tracer
            .trace_transition(&StateTransition::WmStateChanged { window, from, to });
    }

    fn current_state(&self, top: WindowId) -> Option<WmState> {
        let rec = self.registry.get(top)?;
        Some(rec.wm.as_deref()?.state(rec.is_mapped()))
    }

    /// Map a toplevel: push every property the window manager reads at map
    /// time on the first map, reconcile geometry, then map the wrapper and
    /// wait for the manager to show it
    pub(crate) fn wm_map(&mut self, top: WindowId) -> Result<()> {
        let before = self.current_state(top).unwrap_or(WmState::Withdrawn);
        let wm = self.wm(top)?;
        if wm.flags.contains(WmFlags::NEVER_MAPPED) {
            let (master, explicit_colormaps) = (wm.master, wm.flags.contains(WmFlags::COLORMAPS_EXPLICIT));
            self.wm_mut(top)?.flags.remove(WmFlags::NEVER_MAPPED);
            self.ensure_wrapper(top)?;
            self.push_title(top)?;
            self.push_icon_name(top)?;
            self.push_class(top)?;
            self.push_icon_photo(top)?;
            self.push_protocols(top)?;
            if explicit_colormaps {
                self.push_colormap_windows(top)?;
            }
            if let Some(master) = master {
                if !self.registry.get(master).is_some_and(|m| m.is_mapped()) {
                    let wm = self.wm_mut(top)?;
                    wm.withdrawn = true;
                    wm.hints.initial_state = WmState::Withdrawn;
                }
                self.push_transient_for(top)?;
            }
            self.wm_mut(top)?.flags.insert(WmFlags::UPDATE_SIZE_HINTS);
            self.update_hints(top)?;
            self.push_command(top)?;
            self.push_client_machine(top)?;
        }

        let wm = self.wm(top)?;
        if wm.hints.initial_state == WmState::Withdrawn {
            return Ok(());
        }
        if wm.icon_for.is_some() {
            // The window manager maps icons itself.
            self.cancel_idle(top);
            self.wm_mut(top)?.flags.remove(WmFlags::UPDATE_PENDING);
            return self.reconcile_geometry(top);
        }

        let wm = self.wm_mut(top)?;
        wm.flags.insert(WmFlags::ABOUT_TO_MAP);
        wm.flags.remove(WmFlags::UPDATE_PENDING);
        self.cancel_idle(top);
        let reconciled = self.reconcile_geometry(top);
        if let Some(wm) = self.registry.wm_mut(top) {
            wm.flags.remove(WmFlags::ABOUT_TO_MAP);
        }
        reconciled?;
        self.flush_req_state(top)?;

        let initial = self.wm(top)?.hints.initial_state;
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        dc.conn.map_window(wrapper)?;
        log::debug!("mapping {} as {}", self.registry.path(top), initial.name());
        if initial == WmState::Normal {
            self.wait_for_map_notify(top, true)?;
        }
        let after = self.current_state(top).unwrap_or(initial);
        self.trace_state(top, before, after);
        Ok(())
    }

    /// Move a toplevel to `state`. Before the first map this only records
    /// the state to start in.
    pub(crate) fn set_wm_state(&mut self, top: WindowId, state: WmState) -> Result<()> {
        let before = self.current_state(top).unwrap_or(WmState::Withdrawn);
        let wm = self.wm_mut(top)?;
        let never_mapped = wm.flags.contains(WmFlags::NEVER_MAPPED);
        match state {
            WmState::Withdrawn => {
                wm.withdrawn = true;
                wm.hints.initial_state = WmState::Withdrawn;
                if never_mapped {
                    return Ok(());
                }
                self.withdraw_wrapper(top)?;
                self.wait_for_map_notify(top, false)?;
            }
            WmState::Normal => {
                wm.withdrawn = false;
                wm.hints.initial_state = WmState::Normal;
                if never_mapped {
                    return Ok(());
                }
                self.update_hints(top)?;
                self.map_window(top)?;
            }
            WmState::Iconic => {
                wm.hints.initial_state = WmState::Iconic;
                if never_mapped {
                    return Ok(());
                }
                if wm.withdrawn {
                    self.update_hints(top)?;
                    self.map_window(top)?;
                    self.wm_mut(top)?.withdrawn = false;
                } else {
                    self.iconify_wrapper(top)?;
                    self.wait_for_map_notify(top, false)?;
                }
            }
        }
        let after = self.current_state(top).unwrap_or(state);
        self.trace_state(top, before, after);
        Ok(())
    }

    /// Unmap the wrapper and tell the window manager it is withdrawn
    pub(crate) fn withdraw_wrapper(&mut self, top: WindowId) -> Result<()> {
        let Some(rec) = self.registry.get(top) else {
            return Ok(());
        };
        let root = self.registry.display(rec.display).screen(rec.screen).root;
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        dc.conn.unmap_window(wrapper)?;
        let event = UnmapNotifyEvent {
            response_type: UNMAP_NOTIFY_EVENT,
            sequence: 0,
            event: root,
            window: wrapper,
            from_configure: false,
        };
        dc.conn.send_event(false, root, props::wm_request_mask(), event)?;
        Ok(())
    }

    /// Ask the window manager to iconify the wrapper
    fn iconify_wrapper(&mut self, top: WindowId) -> Result<()> {
        let Some(rec) = self.registry.get(top) else {
            return Ok(());
        };
        let root = self.registry.display(rec.display).screen(rec.screen).root;
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        // 3 is IconicState
        props::send_client_message(
            &dc.conn,
            root,
            wrapper,
            dc.atoms.wm_change_state,
            [3, 0, 0, 0, 0],
            props::wm_request_mask(),
        )?;
        Ok(())
    }

    /// `wm withdraw`
    pub fn withdraw(&mut self, win: WindowId) -> Result<()> {
        if let Some(owner) = self.wm(win)?.icon_for {
            return Err(WmError::BadValue(format!(
                "can't withdraw {}: it is an icon for {}",
                self.registry.path(win),
                self.registry.path(owner)
            ))
            .into());
        }
        self.wm_mut(win)?.flags.insert(WmFlags::WITHDRAWN);
        self.set_wm_state(win, WmState::Withdrawn)
    }

    /// `wm iconify`
    pub fn iconify(&mut self, win: WindowId) -> Result<()> {
        let wm = self.wm(win)?;
        let path = self.registry.path(win);
        if wm.icon_for.is_some() {
            return Err(WmError::IsIcon(path).into());
        }
        if wm.master.is_some() {
            return Err(WmError::BadValue(format!("can't iconify \"{}\": it is a transient", path)).into());
        }
        if self.registry.windows[win].flags.contains(WindowFlags::EMBEDDED) {
            return Err(WmError::BadValue(format!("can't iconify {}: it is an embedded window", path)).into());
        }
        self.wm_mut(win)?.flags.remove(WmFlags::WITHDRAWN);
        self.set_wm_state(win, WmState::Iconic)
    }

    /// `wm deiconify`
    pub fn deiconify(&mut self, win: WindowId) -> Result<()> {
        let wm = self.wm(win)?;
        if let Some(owner) = wm.icon_for {
            return Err(WmError::BadValue(format!(
                "can't deiconify {}: it is an icon for {}",
                self.registry.path(win),
                self.registry.path(owner)
            ))
            .into());
        }
        let pending = wm.flags.contains(WmFlags::UPDATE_PENDING) && !wm.flags.contains(WmFlags::NEVER_MAPPED);
        self.wm_mut(win)?.flags.remove(WmFlags::WITHDRAWN);
        if pending {
            // A withdrawn window's queued geometry must land before it shows.
            self.cancel_idle(win);
            self.wm_mut(win)?.flags.remove(WmFlags::UPDATE_PENDING);
            self.reconcile_geometry(win)?;
        }
        self.set_wm_state(win, WmState::Normal)
    }

    /// `wm state`: set by name
    pub fn set_state_by_name(&mut self, win: WindowId, name: &str) -> Result<()> {
        match name {
            "normal" => self.deiconify(win),
            "iconic" => self.iconify(win),
            "withdrawn" => self.withdraw(win),
            "icon" => Err(WmError::BadValue(format!(
                "can't change state of {}: use \"wm iconwindow\" instead",
                self.registry.path(win)
            ))
            .into()),
            other => Err(WmError::BadValue(format!(
                "bad argument \"{}\": must be normal, iconic, or withdrawn",
                other
            ))
            .into()),
        }
    }

    /// Bring the wrapper's geometry in line with what the application
    /// asked for, then wait for the window manager's answer
    pub(crate) fn reconcile_geometry(&mut self, top: WindowId) -> Result<()> {
        let Some(rec) = self.registry.get(top) else {
            return Ok(());
        };
        let Some(wm) = rec.wm.as_deref() else {
            return Ok(());
        };
        let (req_width, req_height, current, flags, container) =
            (rec.req_width, rec.req_height, rec.changes, rec.flags, rec.container);
        let menu_height = wm.menu_height;
        let wrapper_width = wm
            .wrapper
            .and_then(|w| self.registry.get(w))
            .map_or(current.width, |w| w.changes.width);
        let menubar = wm.menubar;
        let menubar_stale = menubar
            .and_then(|m| self.registry.get(m))
            .is_some_and(|m| m.changes.width != wrapper_width || m.changes.height != menu_height);

        if flags.contains(WindowFlags::EMBEDDED) {
            let (width, height) = wm.target_size(req_width, req_height);
            self.wm_mut(top)?.flags.remove(WmFlags::MOVE_PENDING);
            if let Some(container) = container {
                self.geometry_request(container, width, height + menu_height)?;
            }
            return Ok(());
        }

        let plan = self.wm_mut(top)?.plan_geometry(req_width, req_height, &current, menubar_stale);
        if plan.update_hints {
            self.write_size_hints(top, plan.width, plan.height)?;
        }
        let about_to_map = self.wm(top)?.flags.contains(WmFlags::ABOUT_TO_MAP);
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        let (aux, x, y, width, height, moved) = match plan.action {
            GeometryAction::Unchanged => return Ok(()),
            GeometryAction::MoveResize { x, y, width, height } => (
                ConfigureWindowAux::new()
                    .x(x)
                    .y(y)
                    .width(width as u32)
                    .height(height as u32),
                x,
                y,
                width,
                height,
                true,
            ),
            GeometryAction::Resize { width, height } | GeometryAction::ResizeMenubar { width, height } => (
                ConfigureWindowAux::new().width(width as u32).height(height as u32),
                current.x,
                current.y - menu_height,
                width,
                height,
                false,
            ),
        };
        let serial = dc.conn.configure_window(wrapper, &aux)?.sequence_number();
        if let Some(m) = menubar {
            if matches!(plan.action, GeometryAction::ResizeMenubar { .. }) || menubar_stale {
                self.move_resize_window(m, 0, 0, width, menu_height)?;
            }
        }
        log::debug!(
            "configure {} to {}x{}{}",
            self.registry.path(top),
            width,
            height,
            if moved { format!("+{}+{}", x, y) } else { String::new() }
        );
        self.tracer.trace_transition(&StateTransition::ConfigureRequested {
            window: wrapper,
            x,
            y,
            width,
            height,
            moved,
        });
        if about_to_map {
            return Ok(());
        }
        self.wait_for_configure_notify(top, serial)
    }

    /// Block until the ConfigureNotify answering the request with `serial`
    pub(crate) fn wait_for_configure_notify(&mut self, top: WindowId, serial: u64) -> Result<()> {
        let Some(wrapper) = self.wrapper_xid(top) else {
            return Ok(());
        };
        let display = self.registry.windows[top].display;
        let reparent = self.wm(top)?.reparent;
        self.wm_mut(top)?.flags.insert(WmFlags::SYNC_PENDING);
        let wait = WaitFor::Configure {
            wrapper,
            reparent,
            serial,
        };
        let timeout = self.config.wm.configure_timeout();
        let result = self.pump(display, &wait, timeout, move |tk| !tk.registry.is_alive(top));
        if let Some(wm) = self.registry.wm_mut(top) {
            wm.flags.remove(WmFlags::SYNC_PENDING);
        }
        if !result? {
            self.wait_timed_out(top, wrapper, "ConfigureNotify");
        }
        Ok(())
    }

    /// Block until the wrapper is mapped or unmapped
    pub(crate) fn wait_for_map_notify(&mut self, top: WindowId, mapped: bool) -> Result<()> {
        let Some(wrapper) = self.wrapper_xid(top) else {
            return Ok(());
        };
        let rec = &self.registry.windows[top];
        if rec.is_mapped() == mapped {
            return Ok(());
        }
        let display = rec.display;
        let wait = WaitFor::Map {
            wrapper,
            reparent: self.wm(top)?.reparent,
            mapped,
        };
        let timeout = self.config.wm.configure_timeout();
        let found = self.pump(display, &wait, timeout, move |tk| {
            tk.registry.get(top).map_or(true, |r| !r.flags.contains(WindowFlags::TOP_LEVEL) || r.is_mapped() == mapped)
        })?;
        if !found {
            self.wait_timed_out(top, wrapper, if mapped { "MapNotify" } else { "UnmapNotify" });
            return Ok(());
        }
        let move_pending = self
            .registry
            .wm(top)
            .is_some_and(|wm| wm.flags.contains(WmFlags::MOVE_PENDING));
        if mapped && move_pending {
            self.reconcile_geometry(top)?;
        }
        Ok(())
    }

    fn wait_timed_out(&mut self, top: WindowId, wrapper: Window, waiting_for: &str) {
        log::warn!(
            "window manager didn't send {} for {} within {:?}",
            waiting_for,
            self.registry.path(top),
            self.config.wm.configure_timeout()
        );
        self.tracer.trace_transition(&StateTransition::WaitTimedOut {
            window: wrapper,
            waiting_for: waiting_for.to_string(),
        });
    }

    /// Structure, focus and protocol events arriving on a wrapper
    pub(crate) fn wrapper_event(&mut self, top: WindowId, event: &Event) -> Result<()> {
        if !self.registry.is_alive(top) {
            return Ok(());
        }
        match event {
            Event::ConfigureNotify(e) => {
                if !self.wm(top)?.flags.contains(WmFlags::NEVER_MAPPED) {
                    self.on_configure_notify(top, e)?;
                }
            }
            Event::MapNotify(_) => self.wrapper_mapped(top, true)?,
            Event::UnmapNotify(_) => self.wrapper_mapped(top, false)?,
            Event::ReparentNotify(e) => self.on_reparent_notify(top, e)?,
            Event::ClientMessage(e) => {
                let display = self.registry.windows[top].display;
                if e.type_ == self.conn(display)?.atoms.wm_protocols {
                    self.protocol_message(top, e)?;
                }
            }
            Event::FocusIn(e) => {
                if e.detail != NotifyDetail::POINTER {
                    self.focus_arrived(top, CrossingDetail::from_x11(e.detail));
                }
            }
            Event::FocusOut(e) => {
                if e.detail != NotifyDetail::POINTER && e.detail != NotifyDetail::INFERIOR {
                    self.focus_left(top, CrossingDetail::from_x11(e.detail));
                }
            }
            Event::DestroyNotify(_) => {
                log::info!("wrapper of {} destroyed by another client", self.registry.path(top));
                if let Some(rec) = self.registry.get_mut(top) {
                    rec.flags |= WindowFlags::DONT_DESTROY_WINDOW;
                }
                self.destroy_window(top)?;
            }
            Event::PropertyNotify(e) => {
                let display = self.registry.windows[top].display;
                if e.atom == self.conn(display)?.atoms.net_wm_state {
                    self.net_wm_state_changed(top)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn wrapper_mapped(&mut self, top: WindowId, mapped: bool) -> Result<()> {
        let before = self.current_state(top).unwrap_or(WmState::Withdrawn);
        let wrapper = self.wm(top)?.wrapper;
        for w in wrapper.into_iter().chain(Some(top)) {
            if let Some(rec) = self.registry.get_mut(w) {
                rec.flags.set(WindowFlags::MAPPED, mapped);
            }
        }
        let rec = &self.registry.windows[top];
        if let (Some(xid), Some(dc)) = (rec.xid, self.conns.get(rec.display)) {
            if mapped {
                dc.conn.map_window(xid)?;
            } else {
                dc.conn.unmap_window(xid)?;
            }
        }
        self.deliver(top, if mapped { WindowEvent::Map } else { WindowEvent::Unmap });
        let after = self.current_state(top).unwrap_or(before);
        self.trace_state(top, before, after);
        self.follow_master(top, mapped)
    }

    /// The wrapper was moved or resized, by us or by the window manager
    fn on_configure_notify(&mut self, top: WindowId, e: &ConfigureNotifyEvent) -> Result<()> {
        let event = Changes {
            x: e.x.into(),
            y: e.y.into(),
            width: e.width.into(),
            height: e.height.into(),
            border_width: e.border_width.into(),
        };
        let wm = self.wm(top)?;
        let (wrapper_id, reparent) = (wm.wrapper, wm.reparent);
        let Some(wrapper_id) = wrapper_id else {
            return Ok(());
        };
        let frame = match reparent {
            Some(frame) => {
                let geometry = self.query_frame(top, frame);
                if geometry.is_none() {
                    log::debug!("frame 0x{:x} of {} vanished", frame, self.registry.path(top));
                }
                geometry
            }
            None => None,
        };
        let rec = &self.registry.windows[top];
        let (content, req_width, req_height, embedded) = (
            rec.changes,
            rec.req_width,
            rec.req_height,
            rec.flags.contains(WindowFlags::EMBEDDED),
        );
        let mut wrapper = self.registry.windows[wrapper_id].changes;
        let wm = self.wm_mut(top)?;
        if reparent.is_some() && frame.is_none() {
            wm.clear_reparent(&wrapper);
        }
        let updated = wm.apply_configure(&event, frame.as_ref(), &mut wrapper, &content, req_width, req_height, embedded);
        let (menu_height, menubar) = (wm.menu_height, wm.menubar);
        self.registry.windows[wrapper_id].changes = wrapper;
        self.registry.windows[top].changes = updated;

        let rec = &self.registry.windows[top];
        if let (Some(xid), Some(dc)) = (rec.xid, self.conns.get(rec.display)) {
            dc.conn.configure_window(
                xid,
                &ConfigureWindowAux::new()
                    .x(0)
                    .y(menu_height)
                    .width(updated.width as u32)
                    .height(updated.height as u32),
            )?;
        }
        if let Some(m) = menubar {
            let stale = self
                .registry
                .get(m)
                .is_some_and(|r| r.changes.width != wrapper.width || r.changes.height != menu_height);
            if stale {
                self.move_resize_window(m, 0, 0, wrapper.width, menu_height)?;
            }
        }
        self.deliver(
            top,
            WindowEvent::Configure {
                x: updated.x,
                y: updated.y,
                width: updated.width,
                height: updated.height,
                border_width: updated.border_width,
            },
        );
        Ok(())
    }

    /// Geometry of `frame` and where the wrapper sits inside it
    fn query_frame(&self, top: WindowId, frame: Window) -> Option<FrameGeometry> {
        let (dc, wrapper) = self.realized(top)?;
        let geometry = dc.conn.get_geometry(frame).ok()?.reply().ok()?;
        let offset = dc.conn.translate_coordinates(wrapper, frame, 0, 0).ok()?.reply().ok()?;
        let wrapper_bw = self
            .registry
            .wm(top)
            .and_then(|wm| wm.wrapper)
            .and_then(|w| self.registry.get(w))
            .map_or(0, |w| w.changes.border_width);
        let border_width = i32::from(geometry.border_width);
        Some(FrameGeometry {
            x: geometry.x.into(),
            y: geometry.y.into(),
            width: geometry.width.into(),
            height: geometry.height.into(),
            border_width,
            x_in_parent: i32::from(offset.dst_x) + border_width - wrapper_bw,
            y_in_parent: i32::from(offset.dst_y) + border_width - wrapper_bw,
        })
    }

    /// The window manager reparented the wrapper, into a frame or back to
    /// the root
    fn on_reparent_notify(&mut self, top: WindowId, e: &ReparentNotifyEvent) -> Result<()> {
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        let vroot = props::get_window(&dc.conn, wrapper, dc.atoms.wm_root)
            .ok()
            .flatten()
            .or_else(|| props::get_window(&dc.conn, wrapper, dc.atoms.swm_root).ok().flatten());
        self.update_vroot_geometry(top, vroot)?;

        let rec = &self.registry.windows[top];
        let root = self.registry.display(rec.display).screen(rec.screen).root;
        let parent_root = vroot.unwrap_or(root);
        let Some(wrapper_id) = self.wm(top)?.wrapper else {
            return Ok(());
        };

        let frame = if e.parent == parent_root {
            None
        } else {
            let Some((dc, _)) = self.realized(top) else {
                return Ok(());
            };
            frame_below_root(
                |w| dc.conn.query_tree(w).ok()?.reply().ok().map(|t| t.parent),
                e.parent,
                parent_root,
            )
        };
        self.tracer.trace_transition(&StateTransition::Reparented {
            window: wrapper,
            frame,
        });

        let mut wrapper_changes = self.registry.windows[wrapper_id].changes;
        let content = self.registry.windows[top].changes;
        let geometry = frame.and_then(|f| self.query_frame(top, f));
        let wm = self.wm_mut(top)?;
        match (frame, geometry) {
            (Some(frame), Some(geometry)) => {
                wm.reparent = Some(frame);
                wm.apply_frame(&geometry, &mut wrapper_changes, &content);
            }
            _ => {
                wm.clear_reparent(&wrapper_changes);
                wrapper_changes.x = e.x.into();
                wrapper_changes.y = e.y.into();
            }
        }
        let menu_height = wm.menu_height;
        self.registry.windows[wrapper_id].changes = wrapper_changes;
        let top_rec = &mut self.registry.windows[top];
        top_rec.changes.x = wrapper_changes.x;
        top_rec.changes.y = wrapper_changes.y + menu_height;
        if frame.is_some() {
            top_rec.flags.insert(WindowFlags::REPARENTED);
        } else {
            top_rec.flags.remove(WindowFlags::REPARENTED);
        }
        Ok(())
    }

    /// Record the geometry of the virtual root the wrapper lives on, or of
    /// the screen when there is none
    fn update_vroot_geometry(&mut self, top: WindowId, vroot: Option<Window>) -> Result<()> {
        let rec = &self.registry.windows[top];
        let screen = self.registry.display(rec.display).screen(rec.screen).clone();
        let geometry = match (vroot, self.conns.get(rec.display)) {
            (Some(v), Some(dc)) => dc.conn.get_geometry(v).ok().and_then(|c| c.reply().ok()),
            _ => None,
        };
        let wm = self.wm_mut(top)?;
        match geometry {
            Some(g) => {
                wm.vroot = vroot;
                wm.vroot_x = g.x.into();
                wm.vroot_y = g.y.into();
                wm.vroot_width = g.width.into();
                wm.vroot_height = g.height.into();
            }
            None => {
                if vroot.is_some() {
                    log::debug!("virtual root 0x{:x} is gone", vroot.unwrap_or_default());
                }
                wm.vroot = None;
                wm.vroot_x = 0;
                wm.vroot_y = 0;
                wm.vroot_width = screen.width;
                wm.vroot_height = screen.height;
            }
        }
        Ok(())
    }

    /// Give `top` a menubar strip of `height` pixels inside its wrapper,
    /// above the content; `None` removes it. Returns the strip's window.
    pub fn set_menubar(&mut self, top: WindowId, height: Option<i32>) -> Result<Option<WindowId>> {
        self.require_toplevel(top)?;
        let old = self.wm(top)?.menubar;
        let menubar = match height {
            None => {
                let wm = self.wm_mut(top)?;
                wm.menubar = None;
                wm.menu_height = 0;
                if let Some(old) = old {
                    self.destroy_window(old)?;
                }
                None
            }
            Some(height) => {
                let menubar = match old {
                    Some(m) => m,
                    None => self
                        .registry
                        .create_anonymous(top, WindowFlags::MENUBAR | WindowFlags::TOP_HIERARCHY),
                };
                if let Some(rec) = self.registry.get_mut(menubar) {
                    rec.req_height = height.max(1);
                }
                let wm = self.wm_mut(top)?;
                wm.menubar = Some(menubar);
                wm.menu_height = height.max(1);
                if self.wrapper_xid(top).is_some() {
                    self.realize_menubar(top, menubar)?;
                }
                Some(menubar)
            }
        };
        self.wm_mut(top)?.flags.insert(WmFlags::UPDATE_SIZE_HINTS);
        self.schedule_geometry_update(top);
        Ok(menubar)
    }

    /// Height of the menubar strip changed
    pub(crate) fn menubar_resized(&mut self, menubar: WindowId, height: i32) {
        let Some(top) = self.registry.get(menubar).and_then(|r| r.owner) else {
            return;
        };
        if let Some(wm) = self.registry.wm_mut(top) {
            wm.menu_height = height.max(1);
            wm.flags.insert(WmFlags::UPDATE_SIZE_HINTS);
        }
        self.schedule_geometry_update(top);
    }

    fn realize_menubar(&mut self, top: WindowId, menubar: WindowId) -> Result<()> {
        let Some(wrapper) = self.wrapper_xid(top) else {
            return Ok(());
        };
        if self.registry.get(menubar).and_then(|r| r.xid).is_some() {
            return Ok(());
        }
        let width = self.registry.windows[top].changes.width;
        let menu_height = self.wm(top)?.menu_height;
        if let Some(rec) = self.registry.get_mut(menubar) {
            rec.changes = Changes {
                x: 0,
                y: 0,
                width,
                height: menu_height,
                border_width: 0,
            };
            rec.flags.insert(WindowFlags::REPARENTED | WindowFlags::MAPPED);
        }
        let xid = self.create_x_window(menubar, wrapper, window_event_mask())?;
        let display = self.registry.windows[top].display;
        self.conn(display)?.conn.map_window(xid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::tests::detached;
    use std::collections::HashMap;

    fn wm() -> WmInfo {
        WmInfo::new(1280, 800)
    }

    fn at(x: i32, y: i32, width: i32, height: i32) -> Changes {
        Changes {
            x,
            y,
            width,
            height,
            border_width: 0,
        }
    }

    #[test]
    fn test_first_reconcile_resizes_to_request() {
        let mut wm = wm();
        let plan = wm.plan_geometry(300, 200, &at(0, 0, 1, 1), false);
        assert_eq!(
            plan.action,
            GeometryAction::Resize {
                width: 300,
                height: 200
            }
        );
        assert_eq!((wm.config_width, wm.config_height), (300, 200));
        // Nothing left to do once configured.
        let plan = wm.plan_geometry(300, 200, &at(0, 0, 1, 1), false);
        assert_eq!(plan.action, GeometryAction::Unchanged);
    }

    #[test]
    fn test_already_right_size_is_unchanged() {
        let mut wm = wm();
        let plan = wm.plan_geometry(300, 200, &at(0, 0, 300, 200), false);
        assert_eq!(plan.action, GeometryAction::Unchanged);
    }

    #[test]
    fn test_move_pending_moves_frame() {
        let mut wm = wm();
        wm.parse_geometry("400x300+50+60").unwrap();
        assert!(wm.flags.contains(WmFlags::MOVE_PENDING));
        wm.menu_height = 20;
        let plan = wm.plan_geometry(100, 100, &at(0, 0, 1, 1), false);
        assert_eq!(
            plan.action,
            GeometryAction::MoveResize {
                x: 50,
                y: 60,
                width: 400,
                height: 320
            }
        );
        assert!(plan.update_hints);
    }

    #[test]
    fn test_move_pending_cleared_when_already_there() {
        let mut wm = wm();
        wm.parse_geometry("400x300+50+60").unwrap();
        wm.x_in_parent = 4;
        wm.y_in_parent = 22;
        let plan = wm.plan_geometry(100, 100, &at(54, 82, 400, 300), false);
        assert_eq!(plan.action, GeometryAction::Unchanged);
        assert!(!wm.flags.contains(WmFlags::MOVE_PENDING));
    }

    #[test]
    fn test_stale_menubar_relayout() {
        let mut wm = wm();
        wm.config_width = 300;
        wm.config_height = 200;
        wm.menu_height = 25;
        let plan = wm.plan_geometry(300, 200, &at(0, 0, 300, 200), true);
        assert_eq!(
            plan.action,
            GeometryAction::ResizeMenubar {
                width: 300,
                height: 225
            }
        );
    }

    #[test]
    fn test_fullscreen_leaves_geometry_to_manager() {
        let mut wm = wm();
        wm.parse_geometry("400x300+50+60").unwrap();
        wm.attributes.fullscreen = true;
        let plan = wm.plan_geometry(100, 100, &at(0, 0, 1280, 800), false);
        assert_eq!(plan.action, GeometryAction::Unchanged);
        assert!(!wm.flags.contains(WmFlags::MOVE_PENDING));
    }

    #[test]
    fn test_user_resize_becomes_requested_size() {
        let mut wm = wm();
        let mut wrapper = at(10, 10, 200, 200);
        let content = at(10, 10, 200, 200);
        let updated = wm.apply_configure(&at(10, 10, 500, 400), None, &mut wrapper, &content, 200, 200, false);
        assert_eq!((wm.width, wm.height), (500, 400));
        assert_eq!((wm.config_width, wm.config_height), (500, 400));
        assert_eq!((updated.width, updated.height), (500, 400));
        assert_eq!((wrapper.width, wrapper.height), (500, 400));
    }

    #[test]
    fn test_own_resize_does_not_stick() {
        let mut wm = wm();
        wm.flags.insert(WmFlags::SYNC_PENDING | WmFlags::MOVE_PENDING);
        let mut wrapper = at(0, 0, 1, 1);
        let content = at(0, 0, 1, 1);
        wm.apply_configure(&at(0, 0, 300, 200), None, &mut wrapper, &content, 300, 200, false);
        assert_eq!((wm.width, wm.height), (-1, -1));
        assert!(!wm.flags.contains(WmFlags::MOVE_PENDING));
    }

    #[test]
    fn test_resize_to_natural_size_keeps_following_widgets() {
        let mut wm = wm();
        let mut wrapper = at(0, 0, 1, 1);
        wm.apply_configure(&at(0, 0, 300, 200), None, &mut wrapper, &at(0, 0, 1, 1), 300, 200, false);
        assert_eq!((wm.width, wm.height), (-1, -1));
    }

    #[test]
    fn test_gridded_user_resize_in_grid_units() {
        let mut wm = wm();
        wm.set_grid(WindowId::default(), 20, 5, 10, 20);
        let mut wrapper = at(0, 0, 200, 100);
        wm.apply_configure(&at(0, 0, 250, 160), None, &mut wrapper, &at(0, 0, 200, 100), 200, 100, false);
        assert_eq!((wm.width, wm.height), (25, 8));
    }

    #[test]
    fn test_menubar_offsets_content() {
        let mut wm = wm();
        wm.menu_height = 20;
        let mut wrapper = at(0, 0, 300, 220);
        let updated = wm.apply_configure(&at(30, 40, 300, 220), None, &mut wrapper, &at(0, 0, 300, 200), 300, 200, false);
        assert_eq!(updated, at(30, 60, 300, 200));
    }

    #[test]
    fn test_frame_position_is_reported() {
        let mut wm = wm();
        let frame = FrameGeometry {
            x: 100,
            y: 50,
            width: 308,
            height: 226,
            border_width: 0,
            x_in_parent: 4,
            y_in_parent: 22,
        };
        let mut wrapper = at(0, 0, 300, 200);
        let updated = wm.apply_configure(&at(4, 22, 300, 200), Some(&frame), &mut wrapper, &at(0, 0, 300, 200), 300, 200, false);
        assert_eq!((updated.x, updated.y), (104, 72));
        assert_eq!((wm.x, wm.y), (100, 50));
        assert_eq!((wm.parent_width, wm.parent_height), (308, 226));
    }

    #[test]
    fn test_frame_position_kept_while_move_pending() {
        let mut wm = wm();
        wm.parse_geometry("+300+300").unwrap();
        let frame = FrameGeometry {
            x: 100,
            y: 50,
            width: 308,
            height: 226,
            border_width: 0,
            x_in_parent: 4,
            y_in_parent: 22,
        };
        let mut wrapper = at(0, 0, 300, 200);
        wm.apply_frame(&frame, &mut wrapper, &at(0, 0, 300, 200));
        assert_eq!((wm.x, wm.y), (300, 300));
        assert_eq!((wrapper.x, wrapper.y), (104, 72));
    }

    #[test]
    fn test_negative_position_measured_from_far_edge() {
        let mut wm = wm();
        wm.parse_geometry("-10-20").unwrap();
        wm.flags.remove(WmFlags::MOVE_PENDING);
        let mut wrapper = at(0, 0, 300, 200);
        wm.apply_configure(&at(970, 580, 300, 200), None, &mut wrapper, &at(0, 0, 300, 200), 300, 200, false);
        assert_eq!((wm.x, wm.y), (10, 20));
    }

    #[test]
    fn test_frame_below_root_walk() {
        let parents: HashMap<Window, Window> = [(10, 11), (11, 12), (12, 1)].into_iter().collect();
        let lookup = |w| parents.get(&w).copied();
        assert_eq!(frame_below_root(lookup, 10, 1), Some(12));
        assert_eq!(frame_below_root(lookup, 12, 1), Some(12));
        assert_eq!(frame_below_root(lookup, 1, 1), None);
        assert_eq!(frame_below_root(|_| None, 10, 1), None);
    }

    #[test]
    fn test_state_changes_before_first_map() {
        let (mut tk, _, _, main) = detached();
        tk.withdraw(main).unwrap();
        assert_eq!(tk.wm_state_name(main).unwrap(), "withdrawn");
        tk.iconify(main).unwrap();
        assert_eq!(tk.wm_state_name(main).unwrap(), "withdrawn");
        tk.deiconify(main).unwrap();
        assert_eq!(tk.wm_state_name(main).unwrap(), "normal");
        tk.set_state_by_name(main, "iconic").unwrap();
        assert_eq!(tk.wm(main).unwrap().hints.initial_state, WmState::Iconic);
        assert!(tk.set_state_by_name(main, "sideways").is_err());
    }

    #[test]
    fn test_iconify_refusals() {
        let (mut tk, _, _, main) = detached();
        let t = tk.new_toplevel(main, "t", None).unwrap();
        tk.set_transient(t, Some(main)).unwrap();
        let err = tk.iconify(t).unwrap_err();
        assert_eq!(err.to_string(), "can't iconify \".t\": it is a transient");

        let icon = tk.new_toplevel(main, "icon", None).unwrap();
        tk.set_icon_window(main, Some(icon)).unwrap();
        assert!(tk.iconify(icon).unwrap_err().to_string().contains("it is an icon for"));
        assert!(tk.withdraw(icon).is_err());
        assert!(tk.deiconify(icon).is_err());
    }

    #[test]
    fn test_menubar_slot() {
        let (mut tk, _, _, main) = detached();
        let menubar = tk.set_menubar(main, Some(24)).unwrap().unwrap();
        assert_eq!(tk.wm(main).unwrap().menu_height, 24);
        assert_eq!(tk.registry.get(menubar).unwrap().owner, Some(main));
        tk.menubar_resized(menubar, 30);
        assert_eq!(tk.wm(main).unwrap().menu_height, 30);
        assert!(tk.set_menubar(main, None).unwrap().is_none());
        assert_eq!(tk.wm(main).unwrap().menu_height, 0);
        assert!(!tk.registry.is_alive(menubar));
    }
}
