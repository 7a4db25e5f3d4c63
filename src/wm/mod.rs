//! Window-manager negotiation for toplevels.
//!
//! Every toplevel carries a [`WmInfo`]: what the application asked for
//! (geometry, grid, size limits, hints, protocols) and what the window
//! manager last told us (frame geometry, virtual root, reparenting). The
//! arithmetic that turns one into the other lives here as pure methods;
//! the submodules do the protocol work.

pub mod hints;
pub mod negotiate;
pub mod netwm;
pub mod protocol;
pub mod stacking;
pub mod transient;

use bitflags::bitflags;
use x11rb::protocol::xproto::Window;

use crate::error::{Result, WmError};
use crate::registry::{WindowFlags, WindowId};
use crate::state::WmState;
use crate::toolkit::{IdleTask, Toolkit};
use crate::types::{Changes, Gravity};

pub use negotiate::GeometryAction;
pub use netwm::WmAttributes;

bitflags! {
    /// Negotiation flags of a toplevel
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WmFlags: u32 {
        const NEVER_MAPPED = 1 << 0;
        /// Size hints must be pushed at the next reconciliation
        const UPDATE_SIZE_HINTS = 1 << 1;
        /// A geometry update is queued as an idle task
        const UPDATE_PENDING = 1 << 2;
        /// x is measured from the right edge of the virtual root
        const NEGATIVE_X = 1 << 3;
        /// y is measured from the bottom edge of the virtual root
        const NEGATIVE_Y = 1 << 4;
        /// Inside the first reconciliation of a map
        const ABOUT_TO_MAP = 1 << 5;
        /// A new position has been requested and not yet confirmed
        const MOVE_PENDING = 1 << 6;
        /// Waiting for the window manager to answer our own request
        const SYNC_PENDING = 1 << 7;
        const WIDTH_NOT_RESIZABLE = 1 << 8;
        const HEIGHT_NOT_RESIZABLE = 1 << 9;
        /// Withdrawn by the application (not by an unmapped master)
        const WITHDRAWN = 1 << 10;
        const COLORMAPS_EXPLICIT = 1 << 11;
    }
}

bitflags! {
    /// ICCCM `WM_NORMAL_HINTS` flags the application controls
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SizeHintFlags: u32 {
        const US_POSITION = 1 << 0;
        const US_SIZE = 1 << 1;
        const P_POSITION = 1 << 2;
        const P_SIZE = 1 << 3;
        const P_MIN_SIZE = 1 << 4;
        const P_MAX_SIZE = 1 << 5;
        const P_RESIZE_INC = 1 << 6;
        const P_ASPECT = 1 << 7;
        const P_BASE_SIZE = 1 << 8;
        const P_WIN_GRAVITY = 1 << 9;
    }
}

/// Who asked for a position or size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    User,
    Program,
}

/// Contents of `WM_HINTS` that are not window relationships
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hints {
    pub input: bool,
    pub initial_state: WmState,
    pub icon_pixmap: Option<u32>,
    pub icon_mask: Option<u32>,
    pub icon_position: Option<(i32, i32)>,
}

impl Default for Hints {
    fn default() -> Self {
        Self {
            input: true,
            initial_state: WmState::Normal,
            icon_pixmap: None,
            icon_mask: None,
            icon_position: None,
        }
    }
}

/// A `WM_PROTOCOLS` entry with the script run when the window manager
/// sends it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolHandler {
    pub name: String,
    pub command: String,
}

/// Size hints as they go out in `WM_NORMAL_HINTS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeHints {
    pub flags: SizeHintFlags,
    pub min: (i32, i32),
    pub max: (i32, i32),
    pub base: (i32, i32),
    pub inc: (i32, i32),
    pub min_aspect: (i32, i32),
    pub max_aspect: (i32, i32),
    pub gravity: Gravity,
}

/// Window-manager state of one toplevel
#[derive(Debug, Clone)]
pub struct WmInfo {
    pub flags: WmFlags,
    pub title: Option<String>,
    pub icon_name: Option<String>,
    pub hints: Hints,
    /// Group leader
    pub group: Option<WindowId>,
    pub master: Option<WindowId>,
    pub num_transients: usize,
    /// Toplevel used as this window's icon
    pub icon: Option<WindowId>,
    /// Toplevel this window is the icon of
    pub icon_for: Option<WindowId>,
    pub withdrawn: bool,
    pub wrapper: Option<WindowId>,
    pub menubar: Option<WindowId>,
    pub menu_height: i32,

    pub size_hints_flags: SizeHintFlags,
    pub min_width: i32,
    pub min_height: i32,
    /// Zero means "screen size minus decorations"
    pub max_width: i32,
    pub max_height: i32,
    pub grid_win: Option<WindowId>,
    pub width_inc: i32,
    pub height_inc: i32,
    pub req_grid_width: i32,
    pub req_grid_height: i32,
    pub min_aspect: (i32, i32),
    pub max_aspect: (i32, i32),
    pub gravity: Gravity,

    /// Requested size in pixels or grid units, -1 to follow the widgets
    pub width: i32,
    pub height: i32,
    /// Requested position of the decorative frame
    pub x: i32,
    pub y: i32,
    /// Size the wrapper was last configured to
    pub config_width: i32,
    pub config_height: i32,

    /// Outermost window-manager frame, if reparented
    pub reparent: Option<Window>,
    pub parent_width: i32,
    pub parent_height: i32,
    pub x_in_parent: i32,
    pub y_in_parent: i32,
    pub vroot: Option<Window>,
    pub vroot_x: i32,
    pub vroot_y: i32,
    pub vroot_width: i32,
    pub vroot_height: i32,

    pub protocols: Vec<ProtocolHandler>,
    pub command: Option<Vec<String>>,
    pub client_machine: Option<String>,
    pub colormap_windows: Vec<WindowId>,
    /// Packed `_NET_WM_ICON` data
    pub icon_photo: Vec<u32>,
    pub window_type: Vec<String>,
    /// State the window manager reports
    pub attributes: WmAttributes,
    /// State the application asked for
    pub req_state: WmAttributes,
    /// Screen size, for the default maximum size
    pub screen_width: i32,
    pub screen_height: i32,
}

impl WmInfo {
    pub fn new(screen_width: i32, screen_height: i32) -> Self {
        Self {
            flags: WmFlags::NEVER_MAPPED,
            title: None,
            icon_name: None,
            hints: Hints::default(),
            group: None,
            master: None,
            num_transients: 0,
            icon: None,
            icon_for: None,
            withdrawn: false,
            wrapper: None,
            menubar: None,
            menu_height: 0,
            size_hints_flags: SizeHintFlags::empty(),
            min_width: 1,
            min_height: 1,
            max_width: 0,
            max_height: 0,
            grid_win: None,
            width_inc: 1,
            height_inc: 1,
            req_grid_width: -1,
            req_grid_height: -1,
            min_aspect: (0, 0),
            max_aspect: (0, 0),
            gravity: Gravity::NorthWest,
            width: -1,
            height: -1,
            x: 0,
            y: 0,
            config_width: -1,
            config_height: -1,
            reparent: None,
            parent_width: 0,
            parent_height: 0,
            x_in_parent: 0,
            y_in_parent: 0,
            vroot: None,
            vroot_x: 0,
            vroot_y: 0,
            vroot_width: screen_width,
            vroot_height: screen_height,
            protocols: Vec::new(),
            command: None,
            client_machine: None,
            colormap_windows: Vec::new(),
            icon_photo: Vec::new(),
            window_type: Vec::new(),
            attributes: WmAttributes::default(),
            req_state: WmAttributes::default(),
            screen_width,
            screen_height,
        }
    }

    /// Whether an idle geometry update may be queued now
    pub fn wants_idle_update(&self) -> bool {
        !self.flags.intersects(WmFlags::UPDATE_PENDING | WmFlags::NEVER_MAPPED)
    }

    /// Pixel size the wrapper content should have, from the requested size,
    /// the grid and the min/max limits
    pub fn target_size(&self, req_width: i32, req_height: i32) -> (i32, i32) {
        let gridded = self.grid_win.is_some();
        let axis = |want: i32, req: i32, req_grid: i32, inc: i32, min: i32, max: i32| {
            let mut size = if want == -1 {
                req
            } else if gridded {
                req + (want - req_grid) * inc
            } else {
                want
            };
            if size <= 0 {
                size = 1;
            }
            let (min, max) = if gridded {
                let max = if max > 0 { req + (max - req_grid) * inc } else { 0 };
                (req + (min - req_grid) * inc, max)
            } else {
                (min, max)
            };
            if size < min {
                size = min;
            } else if max > 0 && size > max {
                size = max;
            }
            size
        };
        (
            axis(
                self.width,
                req_width,
                self.req_grid_width,
                self.width_inc,
                self.min_width,
                self.max_width,
            ),
            axis(
                self.height,
                req_height,
                self.req_grid_height,
                self.height_inc,
                self.min_height,
                self.max_height,
            ),
        )
    }

    /// Root position of the frame for a window of `width`x`height`,
    /// honoring right/bottom anchoring. `current` is the toplevel's
    /// current geometry.
    pub fn target_position(&self, width: i32, height: i32, current: &Changes) -> (i32, i32) {
        let x = if self.flags.contains(WmFlags::NEGATIVE_X) {
            self.vroot_width - self.x - (width + (self.parent_width - current.width))
        } else {
            self.x
        };
        let y = if self.flags.contains(WmFlags::NEGATIVE_Y) {
            self.vroot_height - self.y - (height + (self.parent_height - current.height))
        } else {
            self.y
        };
        (x, y)
    }

    /// Whether a size change to `width`x`height` requires new size hints
    pub fn size_change_needs_hints(&self, width: i32, height: i32, current: &Changes) -> bool {
        if width == current.width && height == current.height {
            return false;
        }
        if self
            .flags
            .intersects(WmFlags::WIDTH_NOT_RESIZABLE | WmFlags::HEIGHT_NOT_RESIZABLE)
        {
            return true;
        }
        self.grid_win.is_none()
            && !self
                .size_hints_flags
                .intersects(SizeHintFlags::P_MIN_SIZE | SizeHintFlags::P_MAX_SIZE)
    }

    /// Maximum size in pixels or grid units; defaults to the screen minus
    /// room for decorations
    pub fn max_size(&self, req_width: i32, req_height: i32) -> (i32, i32) {
        let width = if self.max_width > 0 {
            self.max_width
        } else {
            let px = self.screen_width - 15;
            if self.grid_win.is_some() {
                self.req_grid_width + (px - req_width) / self.width_inc
            } else {
                px
            }
        };
        let height = if self.max_height > 0 {
            self.max_height
        } else {
            let px = self.screen_height - 30;
            if self.grid_win.is_some() {
                self.req_grid_height + (px - req_height) / self.height_inc
            } else {
                px
            }
        };
        (width, height)
    }

    /// `WM_NORMAL_HINTS` for a window about to become `new_width`x`new_height`
    pub fn size_hints(&self, req_width: i32, req_height: i32, new_width: i32, new_height: i32) -> SizeHints {
        let (max_width, max_height) = self.max_size(req_width, req_height);
        let mut hints = SizeHints {
            flags: self.size_hints_flags | SizeHintFlags::P_MIN_SIZE,
            inc: (self.width_inc, self.height_inc),
            min_aspect: self.min_aspect,
            max_aspect: self.max_aspect,
            gravity: self.gravity,
            ..SizeHints::default()
        };
        if self.grid_win.is_some() {
            let base_w = (req_width - self.req_grid_width * self.width_inc).max(0);
            let base_h = (req_height + self.menu_height - self.req_grid_height * self.height_inc).max(0);
            hints.base = (base_w, base_h);
            hints.min = (
                base_w + self.min_width * self.width_inc,
                base_h + self.min_height * self.height_inc,
            );
            hints.max = (
                base_w + max_width * self.width_inc,
                base_h + max_height * self.height_inc,
            );
        } else {
            hints.min = (self.min_width, self.min_height + self.menu_height);
            hints.max = (max_width, max_height + self.menu_height);
        }
        if self.max_width > 0 || self.max_height > 0 {
            hints.flags |= SizeHintFlags::P_MAX_SIZE;
        }
        if self.flags.contains(WmFlags::WIDTH_NOT_RESIZABLE) {
            hints.min.0 = new_width;
            hints.max.0 = new_width;
            hints.flags |= SizeHintFlags::P_MAX_SIZE;
        }
        if self.flags.contains(WmFlags::HEIGHT_NOT_RESIZABLE) {
            hints.min.1 = new_height + self.menu_height;
            hints.max.1 = new_height + self.menu_height;
            hints.flags |= SizeHintFlags::P_MAX_SIZE;
        }
        hints
    }

    /// Apply a geometry specification `[=][WxH][(+|-)X(+|-)Y]`.
    ///
    /// Nothing changes when the specification is malformed. An empty
    /// string forgets any explicit size.
    pub fn parse_geometry(&mut self, spec: &str) -> std::result::Result<(), WmError> {
        if spec.is_empty() {
            self.width = -1;
            self.height = -1;
            return Ok(());
        }
        let bad = || WmError::BadGeometry(spec.to_string());
        let mut cur = GeometryCursor::new(spec);
        cur.eat(b'=');

        let (mut width, mut height) = (self.width, self.height);
        let (mut x, mut y) = (self.x, self.y);
        let mut flags = self.flags;
        if cur.peek().is_some_and(|c| c.is_ascii_digit()) {
            width = cur.unsigned().ok_or_else(bad)?;
            if !cur.eat(b'x') {
                return Err(bad());
            }
            if !cur.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(bad());
            }
            height = cur.unsigned().ok_or_else(bad)?;
        }

        let mut position_given = false;
        if !cur.at_end() {
            flags.remove(WmFlags::NEGATIVE_X | WmFlags::NEGATIVE_Y);
            match cur.next() {
                Some(b'-') => flags.insert(WmFlags::NEGATIVE_X),
                Some(b'+') => {}
                _ => return Err(bad()),
            }
            x = cur.signed().ok_or_else(bad)?;
            match cur.next() {
                Some(b'-') => flags.insert(WmFlags::NEGATIVE_Y),
                Some(b'+') => {}
                _ => return Err(bad()),
            }
            y = cur.signed().ok_or_else(bad)?;
            if !cur.at_end() {
                return Err(bad());
            }
            position_given = true;
        }

        if position_given
            && !self
                .size_hints_flags
                .intersects(SizeHintFlags::US_POSITION | SizeHintFlags::P_POSITION)
        {
            self.size_hints_flags.insert(SizeHintFlags::US_POSITION);
            flags.insert(WmFlags::UPDATE_SIZE_HINTS);
        }
        self.width = width;
        self.height = height;
        let anchors = WmFlags::NEGATIVE_X | WmFlags::NEGATIVE_Y;
        if x != self.x || y != self.y || (flags & anchors) != (self.flags & anchors) {
            self.x = x;
            self.y = y;
            flags.insert(WmFlags::MOVE_PENDING);
        }
        self.flags = flags;
        Ok(())
    }

    /// Current geometry as `WxH±X±Y`, in grid units when gridded
    pub fn geometry_string(&self, current: &Changes, req_width: i32, req_height: i32) -> String {
        let (width, height) = if self.grid_win.is_some() {
            (
                self.req_grid_width + (current.width - req_width) / self.width_inc,
                self.req_grid_height + (current.height - req_height) / self.height_inc,
            )
        } else {
            (current.width, current.height)
        };
        let x_sign = if self.flags.contains(WmFlags::NEGATIVE_X) { '-' } else { '+' };
        let y_sign = if self.flags.contains(WmFlags::NEGATIVE_Y) { '-' } else { '+' };
        format!("{}x{}{}{}{}{}", width, height, x_sign, self.x, y_sign, self.y)
    }

    /// Start gridding on behalf of `owner`; returns whether anything changed
    pub fn set_grid(&mut self, owner: WindowId, req_width: i32, req_height: i32, width_inc: i32, height_inc: i32) -> bool {
        let width_inc = if width_inc <= 0 { 1 } else { width_inc };
        let height_inc = if height_inc <= 0 { 1 } else { height_inc };
        if self.grid_win.is_some_and(|g| g != owner) {
            return false;
        }
        let grid_flags = SizeHintFlags::P_BASE_SIZE | SizeHintFlags::P_RESIZE_INC;
        if self.req_grid_width == req_width
            && self.req_grid_height == req_height
            && self.width_inc == width_inc
            && self.height_inc == height_inc
            && self.size_hints_flags.contains(grid_flags)
        {
            return false;
        }
        // Pixel sizes from before gridding have no grid meaning.
        if self.grid_win.is_none() && !self.flags.contains(WmFlags::NEVER_MAPPED) {
            self.width = -1;
            self.height = -1;
        }
        self.grid_win = Some(owner);
        self.req_grid_width = req_width;
        self.req_grid_height = req_height;
        self.width_inc = width_inc;
        self.height_inc = height_inc;
        self.size_hints_flags.insert(grid_flags);
        self.flags.insert(WmFlags::UPDATE_SIZE_HINTS);
        true
    }

    /// Stop gridding if `owner` holds the grid, converting an explicit size
    /// back to pixels; returns whether anything changed
    pub fn unset_grid(&mut self, owner: WindowId, req_width: i32, req_height: i32) -> bool {
        if self.grid_win != Some(owner) {
            return false;
        }
        self.grid_win = None;
        self.size_hints_flags
            .remove(SizeHintFlags::P_BASE_SIZE | SizeHintFlags::P_RESIZE_INC);
        if self.width != -1 {
            self.width = req_width + (self.width - self.req_grid_width) * self.width_inc;
            self.height = req_height + (self.height - self.req_grid_height) * self.height_inc;
        }
        self.width_inc = 1;
        self.height_inc = 1;
        self.flags.insert(WmFlags::UPDATE_SIZE_HINTS);
        true
    }

    /// Name reported by `wm state`
    pub fn state_name(&self, mapped: bool) -> &'static str {
        if self.icon_for.is_some() {
            "icon"
        } else if self.withdrawn {
            "withdrawn"
        } else if mapped || (self.flags.contains(WmFlags::NEVER_MAPPED) && self.hints.initial_state == WmState::Normal) {
            "normal"
        } else {
            "iconic"
        }
    }

    /// Current state for tracing
    pub fn state(&self, mapped: bool) -> WmState {
        if self.withdrawn {
            WmState::Withdrawn
        } else if mapped || self.hints.initial_state == WmState::Normal {
            WmState::Normal
        } else {
            WmState::Iconic
        }
    }
}

/// Byte cursor with `strtol`-like number parsing
struct GeometryCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> GeometryCursor<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            bytes: s.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn unsigned(&mut self) -> Option<i32> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos]).ok()?.parse().ok()
    }

    /// A number that may carry its own leading minus sign
    fn signed(&mut self) -> Option<i32> {
        let negative = self.eat(b'-');
        if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return None;
        }
        let n = self.unsigned()?;
        Some(if negative { -n } else { n })
    }
}

impl Toolkit {
    /// Attach window-manager state to a toplevel record
    pub(crate) fn init_toplevel(&mut self, win: WindowId) {
        let Some(rec) = self.registry.get_mut(win) else {
            return;
        };
        let display = rec.display;
        let screen = rec.screen;
        rec.flags |= WindowFlags::TOP_LEVEL | WindowFlags::TOP_HIERARCHY | WindowFlags::WIN_MANAGED;
        // An empty toplevel comes up at a usable size.
        rec.req_width = 200;
        rec.req_height = 200;
        let info = self.registry.display(display).screen(screen).clone();
        if let Some(rec) = self.registry.get_mut(win) {
            rec.wm = Some(Box::new(WmInfo::new(info.width, info.height)));
        }
        self.registry.display_mut(display).toplevels.insert(0, win);
    }

    /// Create a toplevel named `name` under `parent`
    pub fn new_toplevel(&mut self, parent: WindowId, name: &str, screen: Option<usize>) -> Result<WindowId> {
        let rec = self.registry.get(parent).ok_or_else(|| self.no_such_window(parent))?;
        let display = rec.display;
        let screen = screen.unwrap_or(rec.screen);
        let win = self.registry.allocate(display, screen, Some(parent));
        if let Err(e) = self.registry.name(win, parent, name) {
            self.registry.windows.remove(win);
            return Err(e.into());
        }
        self.init_toplevel(win);
        log::debug!("new toplevel {}", self.registry.path(win));
        Ok(win)
    }

    /// Make a not-yet-mapped toplevel live inside `container`, another
    /// window of this process
    pub fn embed_toplevel(&mut self, win: WindowId, container: WindowId) -> Result<()> {
        self.require_toplevel(win)?;
        if self.registry.get(container).is_none() {
            return Err(self.no_such_window(container));
        }
        let never_mapped = self
            .registry
            .wm(win)
            .is_some_and(|wm| wm.flags.contains(WmFlags::NEVER_MAPPED) && wm.wrapper.is_none());
        if !never_mapped {
            return Err(WmError::BadValue(format!(
                "can't embed \"{}\": it has already been mapped",
                self.registry.path(win)
            ))
            .into());
        }
        if let Some(rec) = self.registry.get_mut(win) {
            rec.flags.insert(WindowFlags::EMBEDDED);
            rec.container = Some(container);
        }
        if let Some(rec) = self.registry.get_mut(container) {
            rec.flags.insert(WindowFlags::CONTAINER);
        }
        Ok(())
    }

    /// Fail unless `win` is a toplevel with window-manager state
    pub fn require_toplevel(&self, win: WindowId) -> Result<()> {
        match self.registry.get(win) {
            Some(rec) if rec.wm.is_some() => Ok(()),
            Some(_) => Err(WmError::NotToplevel(self.registry.path(win)).into()),
            None => Err(self.no_such_window(win)),
        }
    }

    pub(crate) fn wm(&self, win: WindowId) -> Result<&WmInfo> {
        match self.registry.get(win) {
            Some(rec) => rec
                .wm
                .as_deref()
                .ok_or_else(|| WmError::NotToplevel(self.registry.path(win)).into()),
            None => Err(self.no_such_window(win)),
        }
    }

    pub(crate) fn wm_mut(&mut self, win: WindowId) -> Result<&mut WmInfo> {
        self.require_toplevel(win)?;
        let path = self.registry.path(win);
        self.registry
            .wm_mut(win)
            .ok_or_else(|| WmError::NotToplevel(path).into())
    }

    /// Queue a geometry update for `win` unless one is queued already or
    /// the window has never been mapped
    pub(crate) fn schedule_geometry_update(&mut self, win: WindowId) {
        let Some(wm) = self.registry.wm_mut(win) else {
            return;
        };
        if wm.wants_idle_update() {
            wm.flags.insert(WmFlags::UPDATE_PENDING);
            self.idle.push_back(IdleTask::UpdateGeometry(win));
        }
    }

    /// `wm geometry`: set the requested geometry
    pub fn set_geometry(&mut self, win: WindowId, spec: &str) -> Result<()> {
        self.wm_mut(win)?.parse_geometry(spec)?;
        self.schedule_geometry_update(win);
        Ok(())
    }

    /// `wm geometry`: report the current geometry
    pub fn geometry(&self, win: WindowId) -> Result<String> {
        let wm = self.wm(win)?;
        let rec = &self.registry.windows[win];
        Ok(wm.geometry_string(&rec.changes, rec.req_width, rec.req_height))
    }

    /// Establish gridding on the toplevel of `win`
    pub fn set_grid(&mut self, win: WindowId, req_width: i32, req_height: i32, width_inc: i32, height_inc: i32) -> Result<()> {
        let top = self.registry.toplevel_of(win).ok_or_else(|| self.no_such_window(win))?;
        let Some(wm) = self.registry.wm_mut(top) else {
            return Ok(());
        };
        if wm.set_grid(win, req_width, req_height, width_inc, height_inc) {
            self.schedule_geometry_update(top);
        }
        Ok(())
    }

    /// Release gridding held by `win`
    pub fn unset_grid(&mut self, win: WindowId) -> Result<()> {
        let top = self.registry.toplevel_of(win).ok_or_else(|| self.no_such_window(win))?;
        let (req_w, req_h) = {
            let rec = &self.registry.windows[top];
            (rec.req_width, rec.req_height)
        };
        let Some(wm) = self.registry.wm_mut(top) else {
            return Ok(());
        };
        if wm.unset_grid(win, req_w, req_h) {
            self.schedule_geometry_update(top);
        }
        Ok(())
    }

    /// `wm grid`: explicit grid set by the application for the toplevel
    /// itself; `None` turns it off
    pub fn wm_grid(&mut self, win: WindowId, grid: Option<(i32, i32, i32, i32)>) -> Result<()> {
        self.require_toplevel(win)?;
        match grid {
            Some((base_w, base_h, inc_w, inc_h)) => {
                if base_w < 0 || base_h < 0 {
                    return Err(WmError::BadValue("baseWidth and baseHeight can't be negative".into()).into());
                }
                if inc_w <= 0 || inc_h <= 0 {
                    return Err(WmError::BadValue("widthInc and heightInc must be positive".into()).into());
                }
                self.set_grid(win, base_w, base_h, inc_w, inc_h)
            }
            None => {
                let owner = self.wm(win)?.grid_win;
                match owner {
                    Some(owner) => self.unset_grid(owner),
                    None => Ok(()),
                }
            }
        }
    }

    /// `wm minsize`
    pub fn set_min_size(&mut self, win: WindowId, width: i32, height: i32) -> Result<()> {
        let wm = self.wm_mut(win)?;
        wm.min_width = width;
        wm.min_height = height;
        wm.size_hints_flags.insert(SizeHintFlags::P_MIN_SIZE);
        self.size_limits_changed(win)
    }

    /// `wm maxsize`
    pub fn set_max_size(&mut self, win: WindowId, width: i32, height: i32) -> Result<()> {
        let wm = self.wm_mut(win)?;
        wm.max_width = width;
        wm.max_height = height;
        wm.size_hints_flags.insert(SizeHintFlags::P_MAX_SIZE);
        self.size_limits_changed(win)
    }

    fn size_limits_changed(&mut self, win: WindowId) -> Result<()> {
        let wm = self.wm_mut(win)?;
        wm.flags.insert(WmFlags::UPDATE_SIZE_HINTS);
        self.schedule_geometry_update(win);
        Ok(())
    }

    /// `wm aspect`; `None` removes the constraint
    pub fn set_aspect(&mut self, win: WindowId, aspect: Option<((i32, i32), (i32, i32))>) -> Result<()> {
        let wm = self.wm_mut(win)?;
        match aspect {
            Some((min, max)) => {
                if min.0 <= 0 || min.1 <= 0 || max.0 <= 0 || max.1 <= 0 {
                    return Err(WmError::BadValue("aspect number can't be <= 0".into()).into());
                }
                wm.min_aspect = min;
                wm.max_aspect = max;
                wm.size_hints_flags.insert(SizeHintFlags::P_ASPECT);
            }
            None => wm.size_hints_flags.remove(SizeHintFlags::P_ASPECT),
        }
        self.size_limits_changed(win)
    }

    /// `wm resizable`
    pub fn set_resizable(&mut self, win: WindowId, width: bool, height: bool) -> Result<()> {
        let wm = self.wm_mut(win)?;
        wm.flags.set(WmFlags::WIDTH_NOT_RESIZABLE, !width);
        wm.flags.set(WmFlags::HEIGHT_NOT_RESIZABLE, !height);
        self.size_limits_changed(win)
    }

    /// `wm positionfrom`; `None` clears the source
    pub fn set_position_from(&mut self, win: WindowId, source: Option<Source>) -> Result<()> {
        let wm = self.wm_mut(win)?;
        wm.size_hints_flags
            .remove(SizeHintFlags::US_POSITION | SizeHintFlags::P_POSITION);
        match source {
            Some(Source::User) => wm.size_hints_flags.insert(SizeHintFlags::US_POSITION),
            Some(Source::Program) => wm.size_hints_flags.insert(SizeHintFlags::P_POSITION),
            None => {}
        }
        self.size_limits_changed(win)
    }

    /// `wm sizefrom`; `None` clears the source
    pub fn set_size_from(&mut self, win: WindowId, source: Option<Source>) -> Result<()> {
        let wm = self.wm_mut(win)?;
        wm.size_hints_flags
            .remove(SizeHintFlags::US_SIZE | SizeHintFlags::P_SIZE);
        match source {
            Some(Source::User) => wm.size_hints_flags.insert(SizeHintFlags::US_SIZE),
            Some(Source::Program) => wm.size_hints_flags.insert(SizeHintFlags::P_SIZE),
            None => {}
        }
        self.size_limits_changed(win)
    }

    /// Window gravity sent with the size hints
    pub fn set_gravity(&mut self, win: WindowId, gravity: Gravity) -> Result<()> {
        let wm = self.wm_mut(win)?;
        wm.gravity = gravity;
        wm.size_hints_flags.insert(SizeHintFlags::P_WIN_GRAVITY);
        self.size_limits_changed(win)
    }

    /// `wm state`
    pub fn wm_state_name(&self, win: WindowId) -> Result<&'static str> {
        let wm = self.wm(win)?;
        Ok(wm.state_name(self.registry.windows[win].is_mapped()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::tests::detached;

    fn wm() -> WmInfo {
        WmInfo::new(1280, 800)
    }

    fn changes(width: i32, height: i32) -> Changes {
        Changes {
            x: 0,
            y: 0,
            width,
            height,
            border_width: 0,
        }
    }

    #[test]
    fn test_parse_full_geometry() {
        let mut wm = wm();
        wm.parse_geometry("300x200+10+20").unwrap();
        assert_eq!((wm.width, wm.height, wm.x, wm.y), (300, 200, 10, 20));
        assert!(wm.flags.contains(WmFlags::MOVE_PENDING));
        assert!(wm.size_hints_flags.contains(SizeHintFlags::US_POSITION));
        assert!(wm.flags.contains(WmFlags::UPDATE_SIZE_HINTS));
        assert!(!wm.flags.intersects(WmFlags::NEGATIVE_X | WmFlags::NEGATIVE_Y));
    }

    #[test]
    fn test_parse_negative_geometry() {
        let mut wm = wm();
        wm.parse_geometry("=300x200-10-20").unwrap();
        assert_eq!((wm.x, wm.y), (10, 20));
        assert!(wm.flags.contains(WmFlags::NEGATIVE_X | WmFlags::NEGATIVE_Y));
        wm.parse_geometry("+-5+-7").unwrap();
        assert_eq!((wm.width, wm.height, wm.x, wm.y), (300, 200, -5, -7));
        assert!(!wm.flags.intersects(WmFlags::NEGATIVE_X | WmFlags::NEGATIVE_Y));
    }

    #[test]
    fn test_parse_size_only_keeps_position() {
        let mut wm = wm();
        wm.x = 40;
        wm.parse_geometry("8x8").unwrap();
        assert_eq!((wm.width, wm.height, wm.x), (8, 8, 40));
        assert!(!wm.flags.contains(WmFlags::MOVE_PENDING));
        assert!(!wm.size_hints_flags.contains(SizeHintFlags::US_POSITION));
    }

    #[test]
    fn test_parse_bad_geometry_changes_nothing() {
        for bad in ["300x", "x200", "300y200", "+10", "300x200+10+20junk", "abc", "300x200*1+2"] {
            let mut wm = wm();
            let err = wm.parse_geometry(bad).unwrap_err();
            assert_eq!(err, WmError::BadGeometry(bad.to_string()));
            assert_eq!((wm.width, wm.height, wm.x, wm.y), (-1, -1, 0, 0));
            assert!(!wm.flags.contains(WmFlags::MOVE_PENDING));
        }
    }

    #[test]
    fn test_empty_geometry_forgets_size() {
        let mut wm = wm();
        wm.parse_geometry("300x200").unwrap();
        wm.parse_geometry("").unwrap();
        assert_eq!((wm.width, wm.height), (-1, -1));
    }

    #[test]
    fn test_geometry_round_trip() {
        let mut wm = wm();
        wm.parse_geometry("300x200+10+20").unwrap();
        let (w, h) = wm.target_size(200, 200);
        assert_eq!((w, h), (300, 200));
        let current = changes(w, h);
        assert_eq!(wm.target_position(w, h, &current), (10, 20));
        assert_eq!(wm.geometry_string(&current, 200, 200), "300x200+10+20");
    }

    #[test]
    fn test_negative_origin_resolves_against_screen() {
        let mut neg = wm();
        neg.parse_geometry("300x200-10-20").unwrap();
        let current = changes(300, 200);
        neg.parent_width = 300;
        neg.parent_height = 200;
        // right edge 10px from the screen's, bottom edge 20px from its bottom
        assert_eq!(neg.target_position(300, 200, &current), (1280 - 10 - 300, 800 - 20 - 200));
        assert_eq!(neg.geometry_string(&current, 200, 200), "300x200-10-20");

        let mut pos = wm();
        pos.parse_geometry("300x200+970+580").unwrap();
        assert_eq!(
            pos.target_position(300, 200, &current),
            neg.target_position(300, 200, &current)
        );
    }

    #[test]
    fn test_target_size_follows_widgets_and_clamps() {
        let mut wm = wm();
        assert_eq!(wm.target_size(150, 90), (150, 90));
        assert_eq!(wm.target_size(0, -4), (1, 1));
        wm.min_width = 200;
        wm.max_height = 50;
        assert_eq!(wm.target_size(150, 90), (200, 50));
    }

    #[test]
    fn test_gridded_target_size() {
        let mut wm = wm();
        let owner = slotmap::KeyData::from_ffi(7).into();
        wm.flags.remove(WmFlags::NEVER_MAPPED);
        assert!(wm.set_grid(owner, 10, 10, 8, 8));
        wm.width = 12;
        wm.height = 10;
        let req = 84;
        assert_eq!(wm.target_size(req, req), (req + (12 - 10) * 8, req));
    }

    #[test]
    fn test_grid_off_and_on_keeps_grid_width() {
        let mut wm = wm();
        let owner = slotmap::KeyData::from_ffi(7).into();
        wm.flags.remove(WmFlags::NEVER_MAPPED);
        wm.set_grid(owner, 10, 10, 8, 8);
        wm.width = 12;
        wm.height = 10;
        let req = 84;
        let (px_w, px_h) = wm.target_size(req, req);

        assert!(wm.unset_grid(owner, req, req));
        assert_eq!(wm.width, px_w);
        assert_eq!(wm.target_size(req, req), (px_w, px_h));

        assert!(wm.set_grid(owner, 10, 10, 8, 8));
        let current = changes(px_w, px_h);
        assert!(wm.geometry_string(&current, req, req).starts_with("12x10"));
    }

    #[test]
    fn test_second_grid_owner_ignored() {
        let mut wm = wm();
        let a = slotmap::KeyData::from_ffi(7).into();
        let b = slotmap::KeyData::from_ffi(8).into();
        assert!(wm.set_grid(a, 10, 10, 8, 8));
        assert!(!wm.set_grid(b, 20, 20, 4, 4));
        assert_eq!(wm.grid_win, Some(a));
        assert!(!wm.set_grid(a, 10, 10, 8, 8));
        assert!(!wm.unset_grid(b, 1, 1));
    }

    #[test]
    fn test_size_hints_gridded() {
        let mut wm = wm();
        let owner = slotmap::KeyData::from_ffi(7).into();
        wm.set_grid(owner, 5, 5, 10, 10);
        let hints = wm.size_hints(50, 50, 80, 80);
        assert_eq!(hints.base, (0, 0));
        assert_eq!(hints.inc, (10, 10));
        assert_eq!(hints.min, (10, 10));
        assert!(hints.flags.contains(SizeHintFlags::P_BASE_SIZE | SizeHintFlags::P_RESIZE_INC));
        assert!(!hints.flags.contains(SizeHintFlags::P_MAX_SIZE));
        // default max converted to grid units and back
        let max_grid = 5 + (1280 - 15 - 50) / 10;
        assert_eq!(hints.max.0, max_grid * 10);
    }

    #[test]
    fn test_size_hints_not_resizable() {
        let mut wm = wm();
        wm.menu_height = 20;
        wm.flags.insert(WmFlags::WIDTH_NOT_RESIZABLE | WmFlags::HEIGHT_NOT_RESIZABLE);
        let hints = wm.size_hints(100, 100, 300, 200);
        assert_eq!(hints.min, (300, 220));
        assert_eq!(hints.max, (300, 220));
        assert!(hints.flags.contains(SizeHintFlags::P_MAX_SIZE | SizeHintFlags::P_MIN_SIZE));
    }

    #[test]
    fn test_size_change_needs_hints() {
        let mut wm = wm();
        let current = changes(100, 100);
        assert!(!wm.size_change_needs_hints(100, 100, &current));
        assert!(wm.size_change_needs_hints(120, 100, &current));
        wm.size_hints_flags.insert(SizeHintFlags::P_MIN_SIZE);
        assert!(!wm.size_change_needs_hints(120, 100, &current));
        wm.flags.insert(WmFlags::WIDTH_NOT_RESIZABLE);
        assert!(wm.size_change_needs_hints(120, 100, &current));
    }

    #[test]
    fn test_state_names() {
        let mut wm = wm();
        assert_eq!(wm.state_name(false), "normal");
        wm.flags.remove(WmFlags::NEVER_MAPPED);
        assert_eq!(wm.state_name(false), "iconic");
        wm.withdrawn = true;
        assert_eq!(wm.state_name(true), "withdrawn");
        wm.icon_for = Some(slotmap::KeyData::from_ffi(3).into());
        assert_eq!(wm.state_name(true), "icon");
    }

    #[test]
    fn test_toolkit_set_geometry_and_report() {
        let (mut tk, _, _, main) = detached();
        let top = tk.new_toplevel(main, "t", None).unwrap();
        tk.set_geometry(top, "300x200+10+20").unwrap();
        // never mapped: nothing queued
        assert!(tk.idle.is_empty());
        let err = tk.set_geometry(top, "bogus").unwrap_err();
        assert_eq!(err.to_string(), "bad geometry specifier \"bogus\"");
        let child = tk.create_window(top, "c").unwrap();
        let err = tk.set_geometry(child, "10x10").unwrap_err();
        assert_eq!(err.to_string(), "window \".t.c\" isn't a top-level window");
    }

    #[test]
    fn test_widget_grid_via_toolkit() {
        let (mut tk, _, _, main) = detached();
        let top = tk.new_toplevel(main, "t", None).unwrap();
        let text = tk.create_window(top, "text").unwrap();
        tk.set_grid(text, 80, 24, 7, 13).unwrap();
        assert_eq!(tk.registry.wm(top).unwrap().grid_win, Some(text));
        tk.destroy_window(text).unwrap();
        assert_eq!(tk.registry.wm(top).unwrap().grid_win, None);
        assert_eq!(tk.registry.wm(top).unwrap().width_inc, 1);
    }

    #[test]
    fn test_gridded_toplevel_geometry_in_grid_units() {
        let (mut tk, _, _, main) = detached();
        let t = tk.new_toplevel(main, "t", None).unwrap();
        tk.geometry_request(t, 50, 50).unwrap();
        tk.wm_grid(t, Some((5, 5, 10, 10))).unwrap();
        tk.set_geometry(t, "8x8").unwrap();

        let wm = tk.wm(t).unwrap();
        assert_eq!((wm.width, wm.height), (8, 8));
        assert_eq!(wm.target_size(50, 50), (80, 80));
        let hints = wm.size_hints(50, 50, 80, 80);
        assert_eq!(hints.base, (0, 0));
        assert_eq!(hints.inc, (10, 10));

        // the window manager grants exactly what was asked for
        let mut wrapper = changes(1, 1);
        let content = tk.registry.windows[t].changes;
        let updated = tk
            .registry
            .wm_mut(t)
            .unwrap()
            .apply_configure(&changes(80, 80), None, &mut wrapper, &content, 50, 50, false);
        assert_eq!((updated.width, updated.height), (80, 80));
        tk.registry.windows[t].changes = updated;
        assert_eq!(tk.geometry(t).unwrap(), "8x8+0+0");
    }

    #[test]
    fn test_gravity_sets_size_hint_flag() {
        let (mut tk, _, _, main) = detached();
        tk.set_gravity(main, Gravity::SouthEast).unwrap();
        let wm = tk.registry.wm(main).unwrap();
        assert_eq!(wm.gravity, Gravity::SouthEast);
        assert!(wm.size_hints_flags.contains(SizeHintFlags::P_WIN_GRAVITY));
    }

    #[test]
    fn test_embed_only_before_first_map() {
        let (mut tk, _, _, main) = detached();
        let holder = tk.create_window(main, "holder").unwrap();
        let top = tk.new_toplevel(main, "inner", None).unwrap();
        tk.embed_toplevel(top, holder).unwrap();
        assert!(tk.registry.windows[top].flags.contains(WindowFlags::EMBEDDED));
        assert_eq!(tk.registry.windows[top].container, Some(holder));
        assert!(tk.registry.windows[holder].flags.contains(WindowFlags::CONTAINER));

        tk.registry.wm_mut(main).unwrap().flags.remove(WmFlags::NEVER_MAPPED);
        assert!(tk.embed_toplevel(main, holder).is_err());
    }
}
