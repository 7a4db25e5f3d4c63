//! Window registry and allocator.
//!
//! All window, application and display records live in slotmap arenas and
//! refer to each other through stable keys, so a destroy handler that tears
//! down an ancestor (or the whole application) in the middle of another
//! destroy can never leave a dangling reference behind.
//!
//! The registry is pure bookkeeping: it never talks to the X server. The
//! toolkit performs the protocol-level side of a destroy from the
//! [`DestroyReport`] it hands back.

use std::collections::HashMap;

use bitflags::bitflags;
use slotmap::{new_key_type, SlotMap};
use x11rb::protocol::xproto::{Colormap, Visualid, Window};

use crate::error::NameError;
use crate::grab::{GrabState, GrabStep};
use crate::interp::InterpId;
use crate::types::Changes;
use crate::wm::WmInfo;

new_key_type! {
    /// Handle of a window record
    pub struct WindowId;
    /// Handle of an application ("main info") record
    pub struct AppId;
    /// Handle of a display record
    pub struct DisplayId;
}

bitflags! {
    /// Lifecycle and structural flags of a window record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowFlags: u32 {
        /// Toplevel window with its own window-manager record
        const TOP_LEVEL = 1 << 0;
        /// Top of a window hierarchy: toplevels, wrappers and menubars
        const TOP_HIERARCHY = 1 << 1;
        const MAPPED = 1 << 2;
        const ALREADY_DEAD = 1 << 3;
        /// The protocol window goes away with its parent's
        const DONT_DESTROY_WINDOW = 1 << 4;
        const EMBEDDED = 1 << 5;
        const CONTAINER = 1 << 6;
        const WRAPPER = 1 << 7;
        const ANONYMOUS = 1 << 8;
        /// Protocol-level parent differs from the logical parent
        const REPARENTED = 1 << 9;
        /// Mapping is handled by the window-manager layer
        const WIN_MANAGED = 1 << 10;
        const MENUBAR = 1 << 11;
    }
}

bitflags! {
    /// Destroy steps already completed for a half-dead window
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct HalfDeadSteps: u8 {
        /// Entry is being resumed by exit-time cleanup
        const CLEANUP = 1 << 0;
        const MAIN_WIN = 1 << 1;
        const CHILDREN = 1 << 2;
        const NOTIFIED = 1 << 3;
    }
}

/// Logical destroy notification, run before protocol state is torn down
pub type DestroyHook = Box<dyn FnMut(&mut Registry, WindowId)>;

/// Static information about one screen of a display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenInfo {
    pub root: Window,
    pub width: i32,
    pub height: i32,
    pub width_mm: i32,
    pub height_mm: i32,
    pub root_visual: Visualid,
    pub root_depth: u8,
    pub default_colormap: Colormap,
}

impl ScreenInfo {
    pub fn from_x11(screen: &x11rb::protocol::xproto::Screen) -> Self {
        Self {
            root: screen.root,
            width: screen.width_in_pixels as i32,
            height: screen.height_in_pixels as i32,
            width_mm: screen.width_in_millimeters as i32,
            height_mm: screen.height_in_millimeters as i32,
            root_visual: screen.root_visual,
            root_depth: screen.root_depth,
            default_colormap: screen.default_colormap,
        }
    }
}

/// One open (or detached) display
#[derive(Debug)]
pub struct DisplayRecord {
    pub name: String,
    pub screens: Vec<ScreenInfo>,
    pub default_screen: usize,
    /// Protocol id to window record
    pub ids: HashMap<Window, WindowId>,
    /// Toplevels carrying window-manager info, newest first
    pub toplevels: Vec<WindowId>,
    /// Unmapped window receiving send-protocol properties
    pub comm_window: Option<Window>,
    pub grab: GrabState,
    /// Window that last received keyboard focus from the server
    pub focus: Option<WindowId>,
    /// Number of live applications using this display
    pub ref_count: usize,
}

impl DisplayRecord {
    pub fn new(name: impl Into<String>, screens: Vec<ScreenInfo>, default_screen: usize) -> Self {
        Self {
            name: name.into(),
            screens,
            default_screen,
            ids: HashMap::new(),
            toplevels: Vec::new(),
            comm_window: None,
            grab: GrabState::default(),
            focus: None,
            ref_count: 0,
        }
    }

    pub fn screen(&self, n: usize) -> &ScreenInfo {
        &self.screens[n.min(self.screens.len().saturating_sub(1))]
    }
}

/// One application: its path-name table and window accounting
#[derive(Debug)]
pub struct AppRecord {
    pub display: DisplayId,
    pub main_window: Option<WindowId>,
    pub paths: HashMap<String, WindowId>,
    /// Windows still alive in this application
    pub window_count: usize,
    pub alive: bool,
    pub class: String,
    pub interp: Option<InterpId>,
    /// Focus window within the application
    pub focus: Option<WindowId>,
}

/// One logical window
pub struct WindowRecord {
    pub xid: Option<Window>,
    pub display: DisplayId,
    pub screen: usize,
    pub parent: Option<WindowId>,
    pub children: Vec<WindowId>,
    /// Full path name (".a.b"), absent for anonymous windows
    pub path: Option<String>,
    pub name: Option<String>,
    pub class: Option<String>,
    pub app: Option<AppId>,
    pub changes: Changes,
    pub req_width: i32,
    pub req_height: i32,
    pub visual: Visualid,
    pub depth: u8,
    pub colormap: Colormap,
    pub flags: WindowFlags,
    pub wm: Option<Box<WmInfo>>,
    /// Toplevel owning this wrapper or menubar
    pub owner: Option<WindowId>,
    /// In-process container of an embedded toplevel
    pub container: Option<WindowId>,
    destroy_hooks: Vec<DestroyHook>,
}

impl std::fmt::Debug for WindowRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowRecord")
            .field("xid", &self.xid)
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

impl WindowRecord {
    pub fn is_toplevel(&self) -> bool {
        self.flags.contains(WindowFlags::TOP_LEVEL)
    }

    pub fn is_mapped(&self) -> bool {
        self.flags.contains(WindowFlags::MAPPED)
    }
}

/// Where a window sits relative to a grab tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreePosition {
    InTree,
    Ancestor,
    Excluded,
}

/// A window whose record was freed by a destroy
#[derive(Debug, Clone)]
pub struct Corpse {
    pub window: WindowId,
    pub display: DisplayId,
    pub xid: Option<Window>,
    pub path: Option<String>,
    /// Issue a DestroyWindow for `xid`
    pub destroy_x: bool,
    pub wrapper_xid: Option<Window>,
}

/// Protocol-level work left over after a destroy
#[derive(Debug, Default)]
pub struct DestroyReport {
    /// Freed windows, in the order their destroy completed
    pub corpses: Vec<Corpse>,
    /// Grab fixups to apply on the server, per display
    pub grab_cleanups: Vec<(DisplayId, Vec<GrabStep>)>,
    /// Transients whose master died; their WM_TRANSIENT_FOR must go
    pub orphaned_transients: Vec<WindowId>,
    /// Toplevels whose WM_HINTS changed because an icon window died
    pub hints_changed: Vec<WindowId>,
    pub dead_apps: Vec<(AppId, Option<InterpId>)>,
    /// Displays no longer used by any application
    pub released_displays: Vec<DisplayId>,
}

struct HalfDead {
    window: WindowId,
    steps: HalfDeadSteps,
}

/// Arena of windows, applications and displays
#[derive(Default)]
pub struct Registry {
    pub windows: SlotMap<WindowId, WindowRecord>,
    pub apps: SlotMap<AppId, AppRecord>,
    pub displays: SlotMap<DisplayId, DisplayRecord>,
    half_dead: Vec<HalfDead>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_display(&mut self, display: DisplayRecord) -> DisplayId {
        self.displays.insert(display)
    }

    pub fn display(&self, id: DisplayId) -> &DisplayRecord {
        &self.displays[id]
    }

    pub fn display_mut(&mut self, id: DisplayId) -> &mut DisplayRecord {
        &mut self.displays[id]
    }

    pub fn get(&self, win: WindowId) -> Option<&WindowRecord> {
        self.windows.get(win)
    }

    pub fn get_mut(&mut self, win: WindowId) -> Option<&mut WindowRecord> {
        self.windows.get_mut(win)
    }

    pub fn wm(&self, win: WindowId) -> Option<&WmInfo> {
        self.windows.get(win).and_then(|w| w.wm.as_deref())
    }

    pub fn wm_mut(&mut self, win: WindowId) -> Option<&mut WmInfo> {
        self.windows.get_mut(win).and_then(|w| w.wm.as_deref_mut())
    }

    /// Allocate a window record with default geometry and no protocol id.
    ///
    /// Visual, depth and colormap are inherited from `parent` when it lives on
    /// the same display and screen, otherwise taken from the screen defaults.
    pub fn allocate(
        &mut self,
        display: DisplayId,
        screen: usize,
        parent: Option<WindowId>,
    ) -> WindowId {
        let screen_info = self.displays[display].screen(screen).clone();
        let (visual, depth, colormap) = match parent.and_then(|p| self.windows.get(p)) {
            Some(p) if p.display == display && p.screen == screen => (p.visual, p.depth, p.colormap),
            _ => (
                screen_info.root_visual,
                screen_info.root_depth,
                screen_info.default_colormap,
            ),
        };
        self.windows.insert(WindowRecord {
            xid: None,
            display,
            screen,
            parent: None,
            children: Vec::new(),
            path: None,
            name: None,
            class: None,
            app: None,
            changes: Changes::default(),
            req_width: 1,
            req_height: 1,
            visual,
            depth,
            colormap,
            flags: WindowFlags::empty(),
            wm: None,
            owner: None,
            container: None,
            destroy_hooks: Vec::new(),
        })
    }

    /// Create the main window (".") of a new application
    pub fn create_main_window(
        &mut self,
        display: DisplayId,
        screen: usize,
        class: &str,
    ) -> (AppId, WindowId) {
        let win = self.allocate(display, screen, None);
        let app = self.apps.insert(AppRecord {
            display,
            main_window: Some(win),
            paths: HashMap::new(),
            window_count: 1,
            alive: true,
            class: class.to_string(),
            interp: None,
            focus: None,
        });
        let rec = &mut self.windows[win];
        rec.app = Some(app);
        rec.path = Some(".".to_string());
        rec.name = Some(class.to_lowercase());
        rec.class = Some(class.to_string());
        rec.flags |= WindowFlags::TOP_LEVEL | WindowFlags::TOP_HIERARCHY | WindowFlags::WIN_MANAGED;
        self.apps[app].paths.insert(".".to_string(), win);
        self.displays[display].ref_count += 1;
        (app, win)
    }

    /// Give `win` the name `name` under `parent` and link it into the tree
    pub fn name(&mut self, win: WindowId, parent: WindowId, name: &str) -> Result<(), NameError> {
        if self.windows[win].path.is_some() {
            return Err(NameError::AlreadyNamed);
        }
        if name.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
            return Err(NameError::UpperCase(name.to_string()));
        }
        let parent_rec = &self.windows[parent];
        let parent_path = parent_rec.path.clone().ok_or(NameError::AnonymousParent)?;
        let app = parent_rec.app.ok_or(NameError::AnonymousParent)?;
        let path = if parent_path == "." {
            format!(".{}", name)
        } else {
            format!("{}.{}", parent_path, name)
        };
        if self.apps[app].paths.contains_key(&path) {
            return Err(NameError::AlreadyExists {
                name: name.to_string(),
            });
        }

        self.apps[app].paths.insert(path.clone(), win);
        self.apps[app].window_count += 1;
        self.windows[parent].children.push(win);
        let rec = &mut self.windows[win];
        rec.parent = Some(parent);
        rec.path = Some(path);
        rec.name = Some(name.to_string());
        rec.app = Some(app);
        Ok(())
    }

    /// Allocate and name a child window
    pub fn create_child(&mut self, parent: WindowId, name: &str) -> Result<WindowId, NameError> {
        let (display, screen) = {
            let p = &self.windows[parent];
            (p.display, p.screen)
        };
        let win = self.allocate(display, screen, Some(parent));
        if let Err(e) = self.name(win, parent, name) {
            self.windows.remove(win);
            return Err(e);
        }
        Ok(win)
    }

    /// Allocate an anonymous helper window (wrapper, menubar slot) owned by a toplevel
    pub fn create_anonymous(&mut self, owner: WindowId, flags: WindowFlags) -> WindowId {
        let (display, screen, app) = {
            let o = &self.windows[owner];
            (o.display, o.screen, o.app)
        };
        let win = self.allocate(display, screen, Some(owner));
        let rec = &mut self.windows[win];
        rec.owner = Some(owner);
        rec.app = app;
        rec.flags |= WindowFlags::ANONYMOUS | flags;
        win
    }

    /// Record the protocol id of a window and index it
    pub fn set_xid(&mut self, win: WindowId, xid: Window) {
        let rec = &mut self.windows[win];
        rec.xid = Some(xid);
        let display = rec.display;
        self.displays[display].ids.insert(xid, win);
    }

    pub fn by_xid(&self, display: DisplayId, xid: Window) -> Option<WindowId> {
        self.displays.get(display)?.ids.get(&xid).copied()
    }

    pub fn lookup(&self, app: AppId, path: &str) -> Option<WindowId> {
        self.apps.get(app)?.paths.get(path).copied()
    }

    pub fn path(&self, win: WindowId) -> String {
        self.windows
            .get(win)
            .and_then(|w| w.path.clone())
            .unwrap_or_default()
    }

    pub fn is_alive(&self, win: WindowId) -> bool {
        self.windows
            .get(win)
            .is_some_and(|w| !w.flags.contains(WindowFlags::ALREADY_DEAD))
    }

    /// Nearest window at the top of a hierarchy (the window itself if it is one)
    pub fn toplevel_of(&self, win: WindowId) -> Option<WindowId> {
        let mut cur = win;
        loop {
            let rec = self.windows.get(cur)?;
            if rec.flags.contains(WindowFlags::TOP_HIERARCHY) {
                return Some(rec.owner.unwrap_or(cur));
            }
            cur = rec.parent?;
        }
    }

    /// Logical parent for hierarchy walks that stop at toplevels
    pub fn hierarchy_parent(&self, win: WindowId) -> Option<WindowId> {
        let rec = self.windows.get(win)?;
        if rec.flags.contains(WindowFlags::TOP_HIERARCHY) {
            None
        } else {
            rec.parent
        }
    }

    /// Position of `win` relative to the tree rooted at `tree`
    pub fn position_in_tree(&self, win: WindowId, tree: WindowId) -> TreePosition {
        let mut cur = Some(win);
        while let Some(w) = cur {
            if w == tree {
                return TreePosition::InTree;
            }
            cur = self.windows.get(w).and_then(|r| r.parent);
        }
        let mut cur = Some(tree);
        while let Some(w) = cur {
            if w == win {
                return TreePosition::Ancestor;
            }
            cur = self.windows.get(w).and_then(|r| r.parent);
        }
        TreePosition::Excluded
    }

    pub fn same_app(&self, a: WindowId, b: WindowId) -> bool {
        match (self.windows.get(a), self.windows.get(b)) {
            (Some(a), Some(b)) => a.app.is_some() && a.app == b.app,
            _ => false,
        }
    }

    /// Register a logical destroy notification for `win`
    pub fn on_destroy(&mut self, win: WindowId, hook: DestroyHook) {
        if let Some(rec) = self.windows.get_mut(win) {
            rec.destroy_hooks.push(hook);
        }
    }

    /// Destroy a window and its descendants.
    ///
    /// Idempotent: destroying a dead or already freed window does nothing.
    /// Destroy hooks may destroy further windows, including ancestors of
    /// the window being destroyed; those reentrant calls are tolerated.
    pub fn destroy(&mut self, win: WindowId) -> DestroyReport {
        let mut report = DestroyReport::default();
        self.destroy_inner(win, &mut report);
        report
    }

    /// Resume destroys that were interrupted, e.g. at process exit
    pub fn cleanup_half_dead(&mut self) -> DestroyReport {
        let mut report = DestroyReport::default();
        while let Some(entry) = self.half_dead.first_mut() {
            entry.steps |= HalfDeadSteps::CLEANUP;
            let win = entry.window;
            match self.windows.get_mut(win) {
                Some(rec) => rec.flags.remove(WindowFlags::ALREADY_DEAD),
                None => {
                    self.half_dead.remove(0);
                    continue;
                }
            }
            self.destroy_inner(win, &mut report);
        }
        report
    }

    pub fn half_dead_count(&self) -> usize {
        self.half_dead.len()
    }

    fn steps(&self, win: WindowId) -> HalfDeadSteps {
        self.half_dead
            .iter()
            .find(|h| h.window == win)
            .map(|h| h.steps)
            .unwrap_or_default()
    }

    fn mark_step(&mut self, win: WindowId, step: HalfDeadSteps) {
        if let Some(h) = self.half_dead.iter_mut().find(|h| h.window == win) {
            h.steps |= step;
        }
    }

    fn destroy_inner(&mut self, win: WindowId, report: &mut DestroyReport) {
        let Some(rec) = self.windows.get_mut(win) else {
            return;
        };
        if rec.flags.contains(WindowFlags::ALREADY_DEAD) {
            return;
        }
        rec.flags.insert(WindowFlags::ALREADY_DEAD);

        let resuming = self
            .half_dead
            .iter()
            .any(|h| h.window == win && h.steps.contains(HalfDeadSteps::CLEANUP));
        if !resuming {
            self.half_dead.push(HalfDead {
                window: win,
                steps: HalfDeadSteps::empty(),
            });
        }

        if !self.steps(win).contains(HalfDeadSteps::MAIN_WIN) {
            self.mark_step(win, HalfDeadSteps::MAIN_WIN);
            if let Some(app) = self.windows[win].app {
                if self.apps[app].main_window == Some(win) {
                    self.apps[app].main_window = None;
                }
            }
        }

        if !self.steps(win).contains(HalfDeadSteps::CHILDREN) {
            loop {
                let Some(&child) = self.windows.get(win).and_then(|r| r.children.first()) else {
                    break;
                };
                if let Some(c) = self.windows.get_mut(child) {
                    if !c.flags.contains(WindowFlags::TOP_HIERARCHY) {
                        c.flags.insert(WindowFlags::DONT_DESTROY_WINDOW);
                    }
                }
                self.destroy_inner(child, report);
                // A child that was already dying stays linked; cut it loose.
                if let Some(rec) = self.windows.get_mut(win) {
                    if rec.children.first() == Some(&child) {
                        rec.children.remove(0);
                        if let Some(c) = self.windows.get_mut(child) {
                            c.parent = None;
                        }
                    }
                }
            }
            self.mark_step(win, HalfDeadSteps::CHILDREN);
        }

        if !self.steps(win).contains(HalfDeadSteps::NOTIFIED) {
            self.mark_step(win, HalfDeadSteps::NOTIFIED);
            let hooks = match self.windows.get_mut(win) {
                Some(rec) => std::mem::take(&mut rec.destroy_hooks),
                None => Vec::new(),
            };
            for mut hook in hooks {
                hook(self, win);
            }
        }

        self.free_window(win, report);

        let Some(pos) = self.half_dead.iter().position(|h| h.window == win) else {
            panic!("half-dead window list corrupted: {:?} missing", win);
        };
        self.half_dead.remove(pos);
    }

    /// Final step of a destroy: unlink from every index and free the record
    fn free_window(&mut self, win: WindowId, report: &mut DestroyReport) {
        let Some(rec) = self.windows.get(win) else {
            return;
        };
        let display = rec.display;
        let parent = rec.parent;
        let app = rec.app;
        let xid = rec.xid;
        let path = rec.path.clone();
        let flags = rec.flags;

        let steps = self.grab_window_died(display, win);
        if !steps.is_empty() {
            report.grab_cleanups.push((display, steps));
        }
        let disp = &mut self.displays[display];
        if disp.focus == Some(win) {
            disp.focus = None;
        }

        let mut wrapper_xid = None;
        if let Some(wm) = self.windows.get_mut(win).and_then(|r| r.wm.take()) {
            wrapper_xid = self.release_wm(win, &wm, report);
        }
        self.clear_grid_owner(win);

        if let Some(p) = parent {
            if let Some(prec) = self.windows.get_mut(p) {
                prec.children.retain(|&c| c != win);
            }
        }
        if let Some(xid) = xid {
            let ids = &mut self.displays[display].ids;
            if ids.get(&xid) == Some(&win) {
                ids.remove(&xid);
            }
        }

        let owned_app = app.filter(|_| !flags.contains(WindowFlags::ANONYMOUS));
        if let Some(app_id) = owned_app {
            let app_rec = &mut self.apps[app_id];
            if let Some(p) = &path {
                if app_rec.paths.get(p) == Some(&win) {
                    app_rec.paths.remove(p);
                }
            }
            if app_rec.focus == Some(win) {
                app_rec.focus = None;
            }
            app_rec.window_count = app_rec.window_count.saturating_sub(1);
            if app_rec.window_count == 0 && app_rec.alive {
                app_rec.alive = false;
                report.dead_apps.push((app_id, app_rec.interp));
                let disp = &mut self.displays[app_rec.display];
                disp.ref_count = disp.ref_count.saturating_sub(1);
                if disp.ref_count == 0 {
                    report.released_displays.push(app_rec.display);
                }
            }
        }

        report.corpses.push(Corpse {
            window: win,
            display,
            xid,
            path,
            destroy_x: xid.is_some() && !flags.contains(WindowFlags::DONT_DESTROY_WINDOW),
            wrapper_xid,
        });
        self.windows.remove(win);
    }

    /// Undo the window-manager relationships of a dying toplevel
    fn release_wm(&mut self, win: WindowId, wm: &WmInfo, report: &mut DestroyReport) -> Option<Window> {
        let display = self.windows[win].display;
        self.displays[display].toplevels.retain(|&t| t != win);

        if let Some(master) = wm.master {
            if let Some(mwm) = self.wm_mut(master) {
                mwm.num_transients = mwm.num_transients.saturating_sub(1);
            }
        }
        if wm.num_transients > 0 {
            let toplevels = self.displays[display].toplevels.clone();
            for t in toplevels {
                if let Some(twm) = self.wm_mut(t) {
                    if twm.master == Some(win) {
                        twm.master = None;
                        report.orphaned_transients.push(t);
                    }
                }
            }
        }
        if let Some(icon) = wm.icon {
            if let Some(iwm) = self.wm_mut(icon) {
                iwm.icon_for = None;
                iwm.withdrawn = true;
            }
        }
        if let Some(icon_for) = wm.icon_for {
            if let Some(owner) = self.wm_mut(icon_for) {
                owner.icon = None;
                report.hints_changed.push(icon_for);
            }
        }

        let mut wrapper_xid = None;
        for helper in [wm.menubar, wm.wrapper].into_iter().flatten() {
            if let Some(rec) = self.windows.remove(helper) {
                if let Some(xid) = rec.xid {
                    self.displays[display].ids.remove(&xid);
                    if rec.flags.contains(WindowFlags::WRAPPER) {
                        wrapper_xid = Some(xid);
                    }
                }
            }
        }
        wrapper_xid
    }

    /// A gridding widget that dies releases the grid of its toplevel
    fn clear_grid_owner(&mut self, win: WindowId) {
        let Some(top) = self.toplevel_of(win) else {
            return;
        };
        if top == win {
            return;
        }
        let req = self
            .windows
            .get(top)
            .map(|r| (r.req_width, r.req_height))
            .unwrap_or((1, 1));
        if let Some(wm) = self.wm_mut(top) {
            if wm.grid_win == Some(win) {
                wm.unset_grid(win, req.0, req.1);
            }
        }
    }

    /// Ids of all live windows below `win`, depth first, `win` excluded
    pub fn descendants(&self, win: WindowId) -> Vec<WindowId> {
        let mut out = Vec::new();
        let mut stack: Vec<WindowId> = self
            .windows
            .get(win)
            .map(|r| r.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(w) = stack.pop() {
            out.push(w);
            if let Some(rec) = self.windows.get(w) {
                stack.extend(rec.children.iter().rev().copied());
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub(crate) fn screen() -> ScreenInfo {
        ScreenInfo {
            root: 0x100,
            width: 1280,
            height: 800,
            width_mm: 338,
            height_mm: 211,
            root_visual: 0x21,
            root_depth: 24,
            default_colormap: 0x20,
        }
    }

    pub(crate) fn registry_with_app() -> (Registry, DisplayId, AppId, WindowId) {
        let mut reg = Registry::new();
        let display = reg.add_display(DisplayRecord::new(":99", vec![screen()], 0));
        let (app, main) = reg.create_main_window(display, 0, "Demo");
        (reg, display, app, main)
    }

    #[test]
    fn test_allocate_defaults() {
        let (mut reg, display, _, main) = registry_with_app();
        let win = reg.allocate(display, 0, Some(main));
        let rec = reg.get(win).unwrap();
        assert_eq!(rec.xid, None);
        assert_eq!(rec.changes.width, 1);
        assert_eq!(rec.changes.height, 1);
        assert_eq!(rec.depth, 24);
        assert_eq!(rec.visual, 0x21);
    }

    #[test]
    fn test_allocate_inherits_visual_from_parent() {
        let (mut reg, display, _, main) = registry_with_app();
        reg.get_mut(main).unwrap().visual = 0x55;
        reg.get_mut(main).unwrap().depth = 32;
        let win = reg.allocate(display, 0, Some(main));
        assert_eq!(reg.get(win).unwrap().visual, 0x55);
        assert_eq!(reg.get(win).unwrap().depth, 32);
    }

    #[test]
    fn test_name_builds_paths() {
        let (mut reg, _, app, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(a, "b").unwrap();
        assert_eq!(reg.path(a), ".a");
        assert_eq!(reg.path(b), ".a.b");
        assert_eq!(reg.lookup(app, ".a.b"), Some(b));
        assert_eq!(reg.get(main).unwrap().children, vec![a]);
    }

    #[test]
    fn test_name_twice_fails() {
        let (mut reg, _, _, main) = registry_with_app();
        reg.create_child(main, "foo").unwrap();
        let err = reg.create_child(main, "foo").unwrap_err();
        assert_eq!(
            err,
            NameError::AlreadyExists {
                name: "foo".to_string()
            }
        );
        // case-sensitive: a different name
        assert!(reg.create_child(main, "fOO").is_ok());
    }

    #[test]
    fn test_upper_case_names_rejected() {
        let (mut reg, display, _, main) = registry_with_app();
        for c in b'A'..=b'Z' {
            let name = format!("{}x", c as char);
            let win = reg.allocate(display, 0, Some(main));
            assert_eq!(reg.name(win, main, &name), Err(NameError::UpperCase(name.clone())));
        }
        for c in b'a'..=b'z' {
            let name = format!("{}x", c as char);
            assert!(reg.create_child(main, &name).is_ok());
        }
        assert!(reg.create_child(main, "1x").is_ok());
        assert!(reg.create_child(main, "_x").is_ok());
    }

    #[test]
    fn test_failed_name_leaves_tree_untouched() {
        let (mut reg, _, app, main) = registry_with_app();
        reg.create_child(main, "foo").unwrap();
        let before = reg.windows.len();
        assert!(reg.create_child(main, "foo").is_err());
        assert_eq!(reg.windows.len(), before);
        assert_eq!(reg.get(main).unwrap().children.len(), 1);
        assert_eq!(reg.apps[app].window_count, 2);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (mut reg, _, _, main) = registry_with_app();
        let child = reg.create_child(main, "c").unwrap();
        let calls = Rc::new(RefCell::new(0));
        let c2 = calls.clone();
        reg.on_destroy(child, Box::new(move |_, _| *c2.borrow_mut() += 1));

        let first = reg.destroy(child);
        assert_eq!(first.corpses.len(), 1);
        let second = reg.destroy(child);
        assert!(second.corpses.is_empty());
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(reg.half_dead_count(), 0);
    }

    #[test]
    fn test_destroy_children_first() {
        let (mut reg, _, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(a, "b").unwrap();
        reg.set_xid(a, 0x400001);
        reg.set_xid(b, 0x400002);

        let report = reg.destroy(a);
        let order: Vec<_> = report.corpses.iter().map(|c| c.window).collect();
        assert_eq!(order, vec![b, a]);
        // the child's protocol window disappears with its parent's
        assert!(!report.corpses[0].destroy_x);
        assert!(report.corpses[1].destroy_x);
        assert!(reg.display(reg.get(main).unwrap().display).ids.is_empty());
    }

    #[test]
    fn test_hook_destroying_ancestor() {
        let (mut reg, _, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(a, "b").unwrap();
        let notified = Rc::new(RefCell::new(Vec::new()));
        let n = notified.clone();
        reg.on_destroy(
            b,
            Box::new(move |reg, w| {
                n.borrow_mut().push(w);
                let report = reg.destroy(a);
                assert!(report.corpses.iter().any(|c| c.window == a));
            }),
        );

        reg.destroy(b);
        assert_eq!(*notified.borrow(), vec![b]);
        assert!(reg.get(a).is_none());
        assert!(reg.get(b).is_none());
        assert!(reg.get(main).unwrap().children.is_empty());
        assert_eq!(reg.half_dead_count(), 0);
    }

    #[test]
    fn test_hook_destroying_self_again_is_noop() {
        let (mut reg, _, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        reg.on_destroy(
            a,
            Box::new(|reg, w| {
                let report = reg.destroy(w);
                assert!(report.corpses.is_empty());
            }),
        );
        let report = reg.destroy(a);
        assert_eq!(report.corpses.len(), 1);
    }

    #[test]
    fn test_last_window_kills_app_and_releases_display() {
        let (mut reg, display, app, main) = registry_with_app();
        let interp = slotmap::KeyData::from_ffi(1).into();
        reg.apps[app].interp = Some(interp);
        reg.create_child(main, "a").unwrap();
        assert_eq!(reg.display(display).ref_count, 1);

        let report = reg.destroy(main);
        assert_eq!(report.dead_apps, vec![(app, Some(interp))]);
        assert_eq!(report.released_displays, vec![display]);
        assert!(!reg.apps[app].alive);
        assert_eq!(reg.display(display).ref_count, 0);
    }

    #[test]
    fn test_shared_display_refcount() {
        let (mut reg, display, _, main) = registry_with_app();
        let (_, main2) = reg.create_main_window(display, 0, "Other");
        assert_eq!(reg.display(display).ref_count, 2);
        let report = reg.destroy(main);
        assert!(report.released_displays.is_empty());
        let report = reg.destroy(main2);
        assert_eq!(report.released_displays, vec![display]);
    }

    #[test]
    fn test_position_in_tree() {
        let (mut reg, _, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(a, "b").unwrap();
        let c = reg.create_child(main, "c").unwrap();
        assert_eq!(reg.position_in_tree(b, a), TreePosition::InTree);
        assert_eq!(reg.position_in_tree(a, a), TreePosition::InTree);
        assert_eq!(reg.position_in_tree(main, a), TreePosition::Ancestor);
        assert_eq!(reg.position_in_tree(c, a), TreePosition::Excluded);
    }

    #[test]
    fn test_descendants_depth_first() {
        let (mut reg, _, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(a, "b").unwrap();
        let c = reg.create_child(main, "c").unwrap();
        assert_eq!(reg.descendants(main), vec![a, b, c]);
    }
}
