//! Process state and window lifecycle.
//!
//! [`Toolkit`] owns everything the toolkit keeps per process: the window
//! registry, server connections, the event queue, idle tasks, interpreters
//! and send bookkeeping. It is created once and passed around by `&mut`.

use std::cell::Cell;
use std::collections::VecDeque;

use anyhow::Context;
use slotmap::{SecondaryMap, SlotMap};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    ConfigureWindowAux, ConnectionExt, CreateWindowAux, EventMask, InputFocus, StackMode, Window, WindowClass,
};
use x11rb::rust_connection::RustConnection;

use crate::config::Config;
use crate::error::{Result, XtkError};
use crate::event::{CrossingDetail, Delivered, EventQueue, InputFilter, NoInputMethod, WindowEvent};
use crate::ewmh::Atoms;
use crate::interp::{InterpId, InterpRecord};
use crate::registry::{AppId, DestroyReport, DisplayId, DisplayRecord, Registry, ScreenInfo, WindowFlags, WindowId};
use crate::send::SendState;
use crate::state::{StateTransition, StateViolation, ViolationKind};
use crate::tracing::{EventTracer, TraceEntry};
use crate::wm::WmFlags;

/// Events every realized internal or content window listens for
pub(crate) fn window_event_mask() -> EventMask {
    EventMask::EXPOSURE
        | EventMask::STRUCTURE_NOTIFY
        | EventMask::PROPERTY_CHANGE
        | EventMask::ENTER_WINDOW
        | EventMask::LEAVE_WINDOW
        | EventMask::POINTER_MOTION
        | EventMask::BUTTON_PRESS
        | EventMask::BUTTON_RELEASE
        | EventMask::KEY_PRESS
        | EventMask::KEY_RELEASE
}

/// Server connection of an open display
pub struct DisplayConn {
    pub conn: RustConnection,
    pub atoms: Atoms,
}

/// Work deferred until no event is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdleTask {
    UpdateGeometry(WindowId),
    /// First map of a toplevel created by a script
    MapToplevel(WindowId),
}

impl IdleTask {
    fn window(self) -> WindowId {
        match self {
            IdleTask::UpdateGeometry(w) | IdleTask::MapToplevel(w) => w,
        }
    }
}

/// The toolkit process state
pub struct Toolkit {
    pub registry: Registry,
    pub(crate) conns: SecondaryMap<DisplayId, DisplayConn>,
    pub(crate) queue: EventQueue,
    pub(crate) idle: VecDeque<IdleTask>,
    pub(crate) delivered: VecDeque<Delivered>,
    pub(crate) send: SendState,
    pub(crate) interps: SlotMap<InterpId, InterpRecord>,
    pub config: Config,
    pub(crate) tracer: EventTracer,
    pub(crate) cancel: Cell<bool>,
    pub(crate) input_filter: Box<dyn InputFilter>,
    pub(crate) host_name: String,
}

impl Toolkit {
    pub fn new(config: Config) -> Self {
        let mut tracer = EventTracer::new();
        tracer.set_enabled(config.wm.trace);
        Self {
            registry: Registry::new(),
            conns: SecondaryMap::new(),
            queue: EventQueue::new(),
            idle: VecDeque::new(),
            delivered: VecDeque::new(),
            send: SendState::default(),
            interps: SlotMap::with_key(),
            config,
            tracer,
            cancel: Cell::new(false),
            input_filter: Box::new(NoInputMethod),
            host_name: host_name(),
        }
    }

    /// Connect to an X server; `None` uses `$DISPLAY`.
    ///
    /// Opening a display that is already open returns the existing record.
    pub fn open_display(&mut self, name: Option<&str>) -> Result<DisplayId> {
        let display_name = name
            .map(str::to_string)
            .or_else(|| std::env::var("DISPLAY").ok())
            .unwrap_or_else(|| ":0".to_string());
        if let Some((id, _)) = self
            .registry
            .displays
            .iter()
            .find(|(id, d)| d.name == display_name && self.conns.contains_key(*id))
        {
            return Ok(id);
        }

        let (conn, screen_num) = x11rb::connect(Some(&display_name))
            .with_context(|| format!("couldn't connect to display \"{}\"", display_name))?;
        let screens = conn.setup().roots.iter().map(ScreenInfo::from_x11).collect();
        let atoms = Atoms::new(&conn).context("Failed to intern atoms")?;
        let id = self
            .registry
            .add_display(DisplayRecord::new(display_name.clone(), screens, screen_num));
        self.conns.insert(id, DisplayConn { conn, atoms });
        log::info!("Connected to display {} (screen {})", display_name, screen_num);
        Ok(id)
    }

    /// Add a display record without a server connection.
    ///
    /// Pure operations (naming, geometry computation, local send) work on
    /// such a display; anything that needs the server fails with
    /// [`XtkError::NotConnected`].
    pub fn add_detached_display(&mut self, name: &str, screens: Vec<ScreenInfo>) -> DisplayId {
        log::debug!("adding detached display {}", name);
        self.registry.add_display(DisplayRecord::new(name, screens, 0))
    }

    pub fn is_connected(&self, display: DisplayId) -> bool {
        self.conns.contains_key(display)
    }

    pub(crate) fn conn(&self, display: DisplayId) -> Result<&DisplayConn> {
        self.conns.get(display).ok_or_else(|| {
            let name = self
                .registry
                .displays
                .get(display)
                .map(|d| d.name.clone())
                .unwrap_or_default();
            XtkError::NotConnected(name)
        })
    }

    /// Create an application with its main window "." on `display`
    pub fn create_app(&mut self, display: DisplayId, class: &str) -> Result<(AppId, WindowId)> {
        let screen = self.registry.display(display).default_screen;
        let (app, main) = self.registry.create_main_window(display, screen, class);
        self.init_toplevel(main);
        log::info!("created application {} on {}", class, self.registry.display(display).name);
        Ok((app, main))
    }

    /// Create an internal child window named `name`
    pub fn create_window(&mut self, parent: WindowId, name: &str) -> Result<WindowId> {
        if !self.registry.is_alive(parent) {
            return Err(self.no_such_window(parent));
        }
        Ok(self.registry.create_child(parent, name)?)
    }

    /// Look up a window by path name
    pub fn window_by_path(&self, app: AppId, path: &str) -> Result<WindowId> {
        self.registry
            .lookup(app, path)
            .filter(|&w| self.registry.is_alive(w))
            .ok_or_else(|| XtkError::NoSuchWindow(path.to_string()))
    }

    pub(crate) fn no_such_window(&self, win: WindowId) -> XtkError {
        let path = self
            .registry
            .get(win)
            .and_then(|r| r.path.clone())
            .unwrap_or_else(|| format!("{:?}", win));
        XtkError::NoSuchWindow(path)
    }

    /// Realize `win` on the server, creating its ancestors (and, for a
    /// toplevel, its wrapper) first
    pub fn make_exist(&mut self, win: WindowId) -> Result<Window> {
        let rec = self.registry.get(win).ok_or_else(|| self.no_such_window(win))?;
        if let Some(xid) = rec.xid {
            return Ok(xid);
        }
        let display = rec.display;
        let flags = rec.flags;
        let parent = rec.parent;
        let screen = rec.screen;
        let is_toplevel = flags.contains(WindowFlags::TOP_LEVEL) && rec.wm.is_some();
        self.conn(display)?;

        let parent_xid = if is_toplevel {
            self.ensure_wrapper(win)?
        } else {
            match parent {
                Some(p) => self.make_exist(p)?,
                None => self.registry.display(display).screen(screen).root,
            }
        };
        let xid = self.create_x_window(win, parent_xid, window_event_mask())?;
        if !flags.contains(WindowFlags::TOP_HIERARCHY) {
            self.stack_below_realized_sibling(win)?;
        }
        Ok(xid)
    }

    /// Issue the CreateWindow for `win` under `parent_xid` and index it
    pub(crate) fn create_x_window(&mut self, win: WindowId, parent_xid: Window, mask: EventMask) -> Result<Window> {
        let rec = self.registry.get(win).ok_or_else(|| self.no_such_window(win))?;
        let (x, y) = if rec.flags.contains(WindowFlags::TOP_LEVEL) {
            (0, self.registry.wm(win).map_or(0, |wm| wm.menu_height))
        } else {
            (rec.changes.x, rec.changes.y)
        };
        let (display, changes, visual, depth, colormap) = (rec.display, rec.changes, rec.visual, rec.depth, rec.colormap);
        let dc = self.conn(display)?;
        let xid = dc.conn.generate_id()?;
        dc.conn.create_window(
            depth,
            xid,
            parent_xid,
            x as i16,
            y as i16,
            changes.width.max(1) as u16,
            changes.height.max(1) as u16,
            changes.border_width as u16,
            WindowClass::INPUT_OUTPUT,
            visual,
            &CreateWindowAux::new()
                .event_mask(mask)
                .colormap(colormap)
                .border_pixel(0),
        )?;
        self.registry.set_xid(win, xid);
        log::debug!("created window 0x{:x} for {}", xid, self.registry.path(win));
        Ok(xid)
    }

    /// Put a newly realized window below the first realized sibling that
    /// comes after it in stacking order
    fn stack_below_realized_sibling(&mut self, win: WindowId) -> Result<()> {
        let Some(rec) = self.registry.get(win) else {
            return Ok(());
        };
        let (Some(parent), Some(xid)) = (rec.parent, rec.xid) else {
            return Ok(());
        };
        let siblings = &self.registry.windows[parent].children;
        let Some(pos) = siblings.iter().position(|&c| c == win) else {
            return Ok(());
        };
        let sibling = siblings[pos + 1..].iter().find_map(|&s| {
            let r = self.registry.get(s)?;
            if r.flags.intersects(WindowFlags::TOP_HIERARCHY | WindowFlags::REPARENTED) {
                None
            } else {
                r.xid
            }
        });
        if let Some(sibling) = sibling {
            let dc = self.conn(rec.display)?;
            dc.conn.configure_window(
                xid,
                &ConfigureWindowAux::new().sibling(sibling).stack_mode(StackMode::BELOW),
            )?;
        }
        Ok(())
    }

    /// Record a widget's preferred size.
    ///
    /// For a toplevel this feeds geometry reconciliation unless the
    /// application fixed an explicit size.
    pub fn geometry_request(&mut self, win: WindowId, width: i32, height: i32) -> Result<()> {
        if self.registry.get(win).is_none() {
            return Err(self.no_such_window(win));
        }
        let rec = &mut self.registry.windows[win];
        rec.req_width = width.max(1);
        rec.req_height = height.max(1);
        if rec.flags.contains(WindowFlags::MENUBAR) {
            self.menubar_resized(win, height);
            return Ok(());
        }
        let Some(wm) = rec.wm.as_deref_mut() else {
            return Ok(());
        };
        if wm.width >= 0 && wm.height >= 0 {
            return Ok(());
        }
        wm.flags.insert(WmFlags::UPDATE_SIZE_HINTS);
        if wm.flags.intersects(WmFlags::NEGATIVE_X | WmFlags::NEGATIVE_Y) {
            wm.flags.insert(WmFlags::MOVE_PENDING);
        }
        self.schedule_geometry_update(win);
        Ok(())
    }

    /// Move and resize an internal window
    pub fn move_resize_window(&mut self, win: WindowId, x: i32, y: i32, width: i32, height: i32) -> Result<()> {
        if self.registry.get(win).is_none() {
            return Err(self.no_such_window(win));
        }
        let rec = &mut self.registry.windows[win];
        if rec.flags.contains(WindowFlags::TOP_LEVEL) {
            let path = rec.path.clone().unwrap_or_default();
            return Err(crate::error::WmError::BadValue(format!(
                "can't move toplevel \"{}\" directly; use its geometry",
                path
            ))
            .into());
        }
        rec.changes.x = x;
        rec.changes.y = y;
        rec.changes.width = width.max(1);
        rec.changes.height = height.max(1);
        let (display, xid, changes) = (rec.display, rec.xid, rec.changes);
        if let Some(xid) = xid {
            let dc = self.conn(display)?;
            dc.conn.configure_window(
                xid,
                &ConfigureWindowAux::new()
                    .x(changes.x)
                    .y(changes.y)
                    .width(changes.width as u32)
                    .height(changes.height as u32),
            )?;
        }
        Ok(())
    }

    /// Map a window; toplevels go through window-manager negotiation
    pub fn map_window(&mut self, win: WindowId) -> Result<()> {
        let rec = self.registry.get(win).ok_or_else(|| self.no_such_window(win))?;
        if rec.flags.intersects(WindowFlags::MAPPED | WindowFlags::ALREADY_DEAD) {
            return Ok(());
        }
        let managed = rec.flags.contains(WindowFlags::WIN_MANAGED);
        let display = rec.display;
        let xid = self.make_exist(win)?;
        if managed {
            return self.wm_map(win);
        }
        if let Some(rec) = self.registry.get_mut(win) {
            rec.flags.insert(WindowFlags::MAPPED);
        }
        self.conn(display)?.conn.map_window(xid)?;
        self.deliver(win, WindowEvent::Map);
        Ok(())
    }

    /// Unmap a window; a toplevel is withdrawn
    pub fn unmap_window(&mut self, win: WindowId) -> Result<()> {
        let rec = self.registry.get(win).ok_or_else(|| self.no_such_window(win))?;
        if rec.flags.contains(WindowFlags::WIN_MANAGED) {
            return self.set_wm_state(win, crate::state::WmState::Withdrawn);
        }
        if !rec.flags.contains(WindowFlags::MAPPED) || rec.flags.contains(WindowFlags::ALREADY_DEAD) {
            return Ok(());
        }
        let (display, xid) = (rec.display, rec.xid);
        if let Some(rec) = self.registry.get_mut(win) {
            rec.flags.remove(WindowFlags::MAPPED);
        }
        if let Some(xid) = xid {
            self.conn(display)?.conn.unmap_window(xid)?;
        }
        self.deliver(win, WindowEvent::Unmap);
        Ok(())
    }

    /// Destroy a window and everything below it, then clean up the server
    /// side of every freed record
    pub fn destroy_window(&mut self, win: WindowId) -> Result<()> {
        let report = self.registry.destroy(win);
        self.finish_destroy(report)
    }

    fn finish_destroy(&mut self, report: DestroyReport) -> Result<()> {
        self.idle.retain(|t| self.registry.is_alive(t.window()));

        for corpse in &report.corpses {
            if let Some(dc) = self.conns.get(corpse.display) {
                if let Some(wrapper) = corpse.wrapper_xid {
                    dc.conn.destroy_window(wrapper)?;
                } else if corpse.destroy_x {
                    if let Some(xid) = corpse.xid {
                        dc.conn.destroy_window(xid)?;
                    }
                }
            }
            self.tracer.trace_transition(&StateTransition::WindowDestroyed {
                window: corpse.xid,
                path: corpse.path.clone(),
            });
            if let Some(path) = &corpse.path {
                self.delivered.push_back(Delivered {
                    window: corpse.window,
                    path: path.clone(),
                    event: WindowEvent::Destroy,
                });
            }
        }

        for (display, steps) in report.grab_cleanups {
            self.run_grab_steps(display, steps)?;
        }
        for transient in report.orphaned_transients {
            self.master_died(transient)?;
        }
        for top in report.hints_changed {
            if self.registry.is_alive(top) {
                self.update_hints(top)?;
            }
        }
        for (app, interp) in report.dead_apps {
            log::info!("application {:?} destroyed", app);
            if let Some(interp) = interp {
                if let Err(e) = self.unregister(interp) {
                    log::warn!("couldn't unregister application: {}", e);
                }
            }
        }
        for display in report.released_displays {
            // Connections stay open until the toolkit is dropped.
            log::info!(
                "display {} no longer used by any application",
                self.registry.display(display).name
            );
        }
        Ok(())
    }

    /// Destroy every application and resume any interrupted destroys
    pub fn shutdown(&mut self) {
        let mains: Vec<WindowId> = self.registry.apps.values().filter_map(|a| a.main_window).collect();
        for main in mains {
            if let Err(e) = self.destroy_window(main) {
                log::warn!("error destroying main window: {}", e);
            }
        }
        let report = self.registry.cleanup_half_dead();
        if let Err(e) = self.finish_destroy(report) {
            log::warn!("error during exit cleanup: {}", e);
        }
        for dc in self.conns.values() {
            if let Err(e) = dc.conn.flush() {
                log::debug!("flush during shutdown failed: {}", e);
            }
        }
    }

    /// Give keyboard focus to `win` within its application.
    ///
    /// The server focus only moves when `force` is set or the application
    /// already has focus in the same toplevel.
    pub fn set_focus(&mut self, win: WindowId, force: bool) -> Result<()> {
        let rec = self.registry.get(win).ok_or_else(|| self.no_such_window(win))?;
        let (display, app) = (rec.display, rec.app);
        let top = self.registry.toplevel_of(win);
        if let Some(app) = app {
            self.registry.apps[app].focus = Some(win);
        }
        let current = self.registry.display(display).focus;
        let focused_here = current.is_some_and(|c| self.registry.toplevel_of(c) == top);
        if !force && !focused_here {
            return Ok(());
        }
        if current == Some(win) {
            return Ok(());
        }
        if let Some(old) = current {
            self.deliver(
                old,
                WindowEvent::FocusOut {
                    detail: CrossingDetail::Nonlinear,
                },
            );
        }
        self.registry.display_mut(display).focus = Some(win);
        self.deliver(
            win,
            WindowEvent::FocusIn {
                detail: CrossingDetail::Nonlinear,
            },
        );
        if force && !focused_here {
            if let Some(wrapper) = top.and_then(|t| self.wrapper_xid(t)) {
                let dc = self.conn(display)?;
                dc.conn
                    .set_input_focus(InputFocus::PARENT, wrapper, x11rb::CURRENT_TIME)?;
            }
        }
        Ok(())
    }

    /// The server moved keyboard focus into toplevel `top`
    pub(crate) fn focus_arrived(&mut self, top: WindowId, detail: CrossingDetail) {
        let Some(rec) = self.registry.get(top) else {
            return;
        };
        let display = rec.display;
        let target = rec
            .app
            .and_then(|a| self.registry.apps[a].focus)
            .filter(|&f| self.registry.is_alive(f) && self.registry.toplevel_of(f) == Some(top))
            .unwrap_or(top);
        self.registry.display_mut(display).focus = Some(target);
        self.deliver(target, WindowEvent::FocusIn { detail });
    }

    /// The server moved keyboard focus out of toplevel `top`
    pub(crate) fn focus_left(&mut self, top: WindowId, detail: CrossingDetail) {
        let Some(display) = self.registry.get(top).map(|r| r.display) else {
            return;
        };
        let Some(current) = self.registry.display(display).focus else {
            return;
        };
        if self.registry.toplevel_of(current) != Some(top) {
            return;
        }
        self.registry.display_mut(display).focus = None;
        self.deliver(current, WindowEvent::FocusOut { detail });
    }

    /// Run one idle task; returns whether there was one
    pub fn run_idle(&mut self) -> Result<bool> {
        let Some(task) = self.idle.pop_front() else {
            return Ok(false);
        };
        match task {
            IdleTask::UpdateGeometry(win) => {
                if let Some(wm) = self.registry.wm_mut(win) {
                    wm.flags.remove(WmFlags::UPDATE_PENDING);
                    self.reconcile_geometry(win)?;
                }
            }
            IdleTask::MapToplevel(win) => {
                let Some(rec) = self.registry.get(win) else {
                    return Ok(true);
                };
                let waiting = rec
                    .wm
                    .as_deref()
                    .is_some_and(|wm| wm.flags.contains(WmFlags::NEVER_MAPPED) && !wm.flags.contains(WmFlags::WITHDRAWN));
                if waiting && self.is_connected(rec.display) {
                    self.map_window(win)?;
                }
            }
        }
        Ok(true)
    }

    pub(crate) fn cancel_idle(&mut self, win: WindowId) {
        self.idle.retain(|t| t.window() != win);
    }

    /// Ask every blocking wait to abort with [`XtkError::Canceled`]
    pub fn request_cancel(&self) {
        self.cancel.set(true);
    }

    pub fn clear_cancel(&self) {
        self.cancel.set(false);
    }

    pub fn set_input_filter(&mut self, filter: Box<dyn InputFilter>) {
        self.input_filter = filter;
    }

    /// Most recent entries of the negotiation trace
    pub fn trace_log(&self, n: usize) -> Vec<TraceEntry> {
        self.tracer.get_last(n)
    }

    pub fn set_tracing(&mut self, enabled: bool) {
        self.tracer.set_enabled(enabled);
    }

    /// Process events until `until` holds
    pub fn run(&mut self, until: impl Fn(&Toolkit) -> bool) -> Result<()> {
        while !until(self) {
            if self.cancel.get() {
                return Err(XtkError::Canceled);
            }
            self.do_one_event(true)?;
        }
        Ok(())
    }

    /// Check the cross-structure invariants of the registry
    pub fn validate_state(&self) -> Vec<StateViolation> {
        let mut violations = Vec::new();
        let reg = &self.registry;

        for (display_id, disp) in &reg.displays {
            let grab = &disp.grab;
            for (what, w) in [
                ("grab window", grab.grab_win),
                ("eventual grab window", grab.eventual),
                ("button window", grab.button_win),
            ] {
                if let Some(w) = w {
                    if !reg.is_alive(w) {
                        violations.push(StateViolation {
                            kind: ViolationKind::GrabInvariant,
                            description: format!("{} {:?} on {} is not alive", what, w, disp.name),
                        });
                    }
                }
            }
            if grab.button_win.is_some() && !grab.buttons_down {
                violations.push(StateViolation {
                    kind: ViolationKind::GrabInvariant,
                    description: format!("button window set on {} with no button down", disp.name),
                });
            }

            for (&xid, &win) in &disp.ids {
                match reg.get(win) {
                    Some(rec) if rec.xid == Some(xid) && rec.display == display_id => {}
                    _ => violations.push(StateViolation {
                        kind: ViolationKind::StaleIdEntry,
                        description: format!("id 0x{:x} on {} maps to {:?}", xid, disp.name, win),
                    }),
                }
            }

            for &top in &disp.toplevels {
                let Some(wm) = reg.wm(top) else {
                    violations.push(StateViolation {
                        kind: ViolationKind::MissingWmInfo,
                        description: format!("toplevel list entry {:?} has no wm info", top),
                    });
                    continue;
                };
                let count = disp
                    .toplevels
                    .iter()
                    .filter(|&&t| reg.wm(t).is_some_and(|w| w.master == Some(top)))
                    .count();
                if count != wm.num_transients {
                    violations.push(StateViolation {
                        kind: ViolationKind::TransientCount,
                        description: format!(
                            "{} records {} transients, found {}",
                            reg.path(top),
                            wm.num_transients,
                            count
                        ),
                    });
                }
            }
        }

        for (app_id, app) in &reg.apps {
            for (path, &win) in &app.paths {
                let ok = reg
                    .get(win)
                    .is_some_and(|r| r.path.as_deref() == Some(path.as_str()) && r.app == Some(app_id));
                if !ok {
                    violations.push(StateViolation {
                        kind: ViolationKind::StalePathEntry,
                        description: format!("path {} maps to {:?}", path, win),
                    });
                }
            }
        }

        for (win, rec) in &reg.windows {
            let managed = rec.flags.contains(WindowFlags::TOP_LEVEL) && !rec.flags.contains(WindowFlags::ANONYMOUS);
            if managed && rec.wm.is_none() {
                violations.push(StateViolation {
                    kind: ViolationKind::MissingWmInfo,
                    description: format!("toplevel {} ({:?}) has no wm info", reg.path(win), win),
                });
            }
        }

        if reg.half_dead_count() > 0 {
            violations.push(StateViolation {
                kind: ViolationKind::HalfDeadLeaked,
                description: format!("{} windows left half dead", reg.half_dead_count()),
            });
        }
        violations
    }
}

impl Drop for Toolkit {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Host name for WM_CLIENT_MACHINE
fn host_name() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for its full length and gethostname
    // writes at most that many bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::tests::screen;

    /// Toolkit with one detached display and one application
    pub(crate) fn detached() -> (Toolkit, DisplayId, AppId, WindowId) {
        let mut tk = Toolkit::new(Config::default());
        let display = tk.add_detached_display(":99", vec![screen()]);
        let (app, main) = tk.create_app(display, "Demo").unwrap();
        (tk, display, app, main)
    }

    #[test]
    fn test_detached_display_refuses_server_work() {
        let (mut tk, _, _, main) = detached();
        let err = tk.make_exist(main).unwrap_err();
        assert!(matches!(err, XtkError::NotConnected(ref name) if name == ":99"));
    }

    #[test]
    fn test_create_app_registers_toplevel() {
        let (tk, display, app, main) = detached();
        assert_eq!(tk.registry.display(display).toplevels, vec![main]);
        assert!(tk.registry.wm(main).is_some());
        assert_eq!(tk.window_by_path(app, ".").unwrap(), main);
        assert!(tk.validate_state().is_empty());
    }

    #[test]
    fn test_window_by_path_unknown() {
        let (tk, _, app, _) = detached();
        let err = tk.window_by_path(app, ".nope").unwrap_err();
        assert_eq!(err.to_string(), "bad window path name \".nope\"");
    }

    #[test]
    fn test_destroy_delivers_destroy_events() {
        let (mut tk, _, _, main) = detached();
        let a = tk.create_window(main, "a").unwrap();
        tk.create_window(a, "b").unwrap();
        tk.destroy_window(a).unwrap();
        let paths: Vec<String> = tk
            .take_delivered()
            .into_iter()
            .filter(|d| d.event == WindowEvent::Destroy)
            .map(|d| d.path)
            .collect();
        assert_eq!(paths, vec![".a.b".to_string(), ".a".to_string()]);
        assert!(tk.validate_state().is_empty());
    }

    #[test]
    fn test_shutdown_destroys_every_application() {
        let (mut tk, _, app, main) = detached();
        tk.create_window(main, "a").unwrap();
        tk.shutdown();
        assert!(!tk.registry.apps[app].alive);
        assert!(!tk.registry.is_alive(main));
        assert!(tk.validate_state().is_empty());
    }

    #[test]
    fn test_geometry_request_schedules_update_once_mapped() {
        let (mut tk, _, _, main) = detached();
        tk.geometry_request(main, 300, 120).unwrap();
        // never mapped: no idle work yet
        assert!(tk.idle.is_empty());
        tk.registry.wm_mut(main).unwrap().flags.remove(WmFlags::NEVER_MAPPED);
        tk.geometry_request(main, 310, 120).unwrap();
        assert_eq!(tk.idle.len(), 1);
        tk.geometry_request(main, 320, 120).unwrap();
        assert_eq!(tk.idle.len(), 1);
        assert_eq!(tk.registry.get(main).unwrap().req_width, 320);
    }

    #[test]
    fn test_set_focus_force_moves_display_focus() {
        let (mut tk, display, _, main) = detached();
        let entry = tk.create_window(main, "entry").unwrap();
        tk.set_focus(entry, false).unwrap();
        assert_eq!(tk.registry.display(display).focus, None);
        tk.focus_arrived(main, CrossingDetail::Nonlinear);
        assert_eq!(tk.registry.display(display).focus, Some(entry));
        tk.focus_left(main, CrossingDetail::Nonlinear);
        assert_eq!(tk.registry.display(display).focus, None);
        let events: Vec<WindowEvent> = tk.take_delivered().into_iter().map(|d| d.event).collect();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_cancel_flag() {
        let (mut tk, _, _, _) = detached();
        tk.request_cancel();
        assert!(matches!(tk.run(|_| false), Err(XtkError::Canceled)));
        tk.clear_cancel();
        assert!(tk.run(|_| true).is_ok());
    }

    struct SwallowAll;

    impl InputFilter for SwallowAll {
        fn filter_key(&mut self, _display: DisplayId, _focus: Option<WindowId>, _event: &x11rb::protocol::Event) -> bool {
            true
        }
    }

    #[test]
    fn test_input_filter_is_replaceable() {
        let (mut tk, display, _, _) = detached();
        let key = x11rb::protocol::Event::KeyPress(Default::default());
        assert!(!tk.input_filter.filter_key(display, None, &key));
        tk.set_input_filter(Box::new(SwallowAll));
        assert!(tk.input_filter.filter_key(display, None, &key));
    }

    #[test]
    fn test_next_delivered_in_order() {
        let (mut tk, _, _, main) = detached();
        let a = tk.create_window(main, "a").unwrap();
        tk.create_window(main, "b").unwrap();
        tk.take_delivered();
        tk.destroy_window(a).unwrap();
        let first = tk.next_delivered().unwrap();
        assert_eq!((first.path.as_str(), first.event), (".a", WindowEvent::Destroy));
        assert!(tk.next_delivered().is_none());
    }
}
