//! Pointer and keyboard grabs.
//!
//! Grab bookkeeping lives in a per-display [`GrabState`]. The pure parts
//! (state table, tree classification, synthetic crossing sequences) are
//! methods on [`Registry`]; the parts that talk to the server are methods on
//! [`Toolkit`] and execute the [`GrabStep`]s the pure layer plans.
//!
//! The committed grab window only changes when a queued commit marker is
//! processed, so that synthetic enter/leave events queued ahead of it are
//! still classified against the old grab.

use std::time::Duration;

use bitflags::bitflags;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt, EventMask, GrabMode, GrabStatus, Window};

use crate::error::{GrabError, Result, XtkError};
use crate::event::{Crossing, CrossingDetail, CrossingMode, Pointer, QueuePosition, QueuedEvent, WindowEvent};
use crate::registry::{DisplayId, Registry, TreePosition, WindowFlags, WindowId};
use crate::state::{GrabPhase, StateTransition};
use crate::toolkit::Toolkit;
use crate::wait::WaitFor;

/// Mask of all pointer buttons in an event state
pub const ALL_BUTTONS: u16 = 0x1f00;

/// State bit of a single button (1-based)
pub fn button_mask(button: u8) -> u16 {
    match button {
        1..=5 => 1 << (7 + button as u16),
        _ => 0,
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GrabFlags: u8 {
        /// Grab requested as global
        const GLOBAL = 1 << 0;
        /// Local grab promoted to a server grab while a button is down
        const TEMP_GLOBAL = 1 << 1;
    }
}

/// Inputs of the grab state table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabInput {
    FirstPress,
    Press,
    Release,
    LastRelease,
    Grab,
    Ungrab,
}

/// Grab bookkeeping of one display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrabState {
    /// Grab window as seen by event processing
    pub grab_win: Option<WindowId>,
    /// Grab window once queued commits have drained
    pub eventual: Option<WindowId>,
    /// Window of the button auto-grab (restrict window)
    pub button_win: Option<WindowId>,
    /// Window the server last put the pointer in
    pub server_win: Option<WindowId>,
    pub flags: GrabFlags,
    /// A pointer button is held
    pub buttons_down: bool,
}

impl GrabState {
    pub fn phase(&self) -> GrabPhase {
        match (self.eventual.is_some(), self.button_win.is_some()) {
            (false, false) => GrabPhase::Ungrabbed,
            (false, true) => GrabPhase::Button,
            (true, false) => GrabPhase::Grabbed,
            (true, true) => GrabPhase::GrabAndButton,
        }
    }

    /// Whether the server routes all pointer events to this client
    pub fn captured(&self) -> bool {
        match self.phase() {
            GrabPhase::Ungrabbed => false,
            GrabPhase::Button | GrabPhase::GrabAndButton => true,
            GrabPhase::Grabbed => self.buttons_down || self.flags.contains(GrabFlags::GLOBAL),
        }
    }

    /// Apply one input of the state table
    pub fn apply(&mut self, input: GrabInput, window: Option<WindowId>) {
        match input {
            GrabInput::FirstPress => {
                self.buttons_down = true;
                self.button_win = window;
            }
            GrabInput::Press => {
                self.buttons_down = true;
                if self.eventual.is_none() && self.button_win.is_none() {
                    self.button_win = window;
                }
            }
            GrabInput::Release => {}
            GrabInput::LastRelease => {
                self.buttons_down = false;
                self.button_win = None;
            }
            GrabInput::Grab => {
                self.button_win = None;
                self.eventual = window;
            }
            GrabInput::Ungrab => {
                if self.eventual.is_some() {
                    self.eventual = None;
                    self.button_win = None;
                }
            }
        }
    }
}

/// Position of a window relative to the active grab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabRelation {
    /// No grab, or a local grab of another application
    None,
    InTree,
    Ancestor,
    Excluded,
}

impl GrabRelation {
    fn outside(self) -> bool {
        matches!(self, GrabRelation::Ancestor | GrabRelation::Excluded)
    }
}

/// One synthetic crossing event to queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticCrossing {
    pub window: WindowId,
    pub leave: bool,
    pub detail: CrossingDetail,
    pub mode: CrossingMode,
}

/// Server-side work planned by the pure grab layer, executed in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabStep {
    /// Queue crossing events at the mark
    Crossings(Vec<SyntheticCrossing>),
    /// Release the server pointer and keyboard grabs and eat the echoes
    ReleaseServer,
    /// Queue a commit of the grab window at the mark
    Commit(Option<WindowId>),
}

/// What event processing should do with a pointer event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerVerdict {
    Deliver,
    Suppress,
    /// Requeue at the head as if it happened in another window
    Retarget(WindowId),
}

/// Server work to run right after classifying a pointer event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Best-effort promotion of a local grab to a temporary server grab
    PromoteTempGlobal(WindowId),
    Steps(Vec<GrabStep>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdict: PointerVerdict,
    pub follow_up: Option<FollowUp>,
}

impl Classification {
    fn verdict(verdict: PointerVerdict) -> Self {
        Self {
            verdict,
            follow_up: None,
        }
    }
}

impl Registry {
    /// Relation of `win` to the committed grab on its display
    pub fn grab_relation(&self, win: WindowId) -> GrabRelation {
        let Some(rec) = self.windows.get(win) else {
            return GrabRelation::None;
        };
        let grab = &self.displays[rec.display].grab;
        let Some(grab_win) = grab.grab_win else {
            return GrabRelation::None;
        };
        if !self.same_app(win, grab_win) && !grab.flags.contains(GrabFlags::GLOBAL) {
            return GrabRelation::None;
        }
        match self.position_in_tree(win, grab_win) {
            TreePosition::InTree => GrabRelation::InTree,
            TreePosition::Ancestor => GrabRelation::Ancestor,
            TreePosition::Excluded => GrabRelation::Excluded,
        }
    }

    /// Ancestors of `win` up to and including its top of hierarchy
    fn crossing_chain(&self, win: Option<WindowId>) -> Vec<WindowId> {
        let mut chain = Vec::new();
        let mut cur = win;
        while let Some(w) = cur {
            let Some(rec) = self.windows.get(w) else {
                break;
            };
            chain.push(w);
            if rec.flags.contains(WindowFlags::TOP_HIERARCHY) {
                break;
            }
            cur = rec.parent;
        }
        chain
    }

    /// Enter/leave sequence that moves the pointer from `source` to `dest`.
    ///
    /// Leaves come first, innermost window first; enters follow, outermost
    /// first. Windows without a protocol id get no events.
    pub fn crossing_events(
        &self,
        source: Option<WindowId>,
        dest: Option<WindowId>,
        leave: bool,
        enter: bool,
        mode: CrossingMode,
    ) -> Vec<SyntheticCrossing> {
        if source == dest {
            return Vec::new();
        }
        let up_chain = self.crossing_chain(source);
        let down_chain = self.crossing_chain(dest);
        let (up, down) = match up_chain
            .iter()
            .position(|w| down_chain.contains(w))
        {
            Some(i) => {
                let common = up_chain[i];
                let j = down_chain.iter().position(|&w| w == common).unwrap_or(0);
                (i, j)
            }
            None => (up_chain.len(), down_chain.len()),
        };

        let mut out = Vec::new();
        let push = |out: &mut Vec<SyntheticCrossing>, window: WindowId, leave: bool, detail| {
            if self.windows.get(window).is_some_and(|r| r.xid.is_some()) {
                out.push(SyntheticCrossing {
                    window,
                    leave,
                    detail,
                    mode,
                });
            }
        };

        let (first, middle, last) = if down == 0 && source.is_some() {
            // source is below dest
            (
                CrossingDetail::Ancestor,
                CrossingDetail::Virtual,
                CrossingDetail::Inferior,
            )
        } else if up == 0 {
            // dest is below source
            (
                CrossingDetail::Inferior,
                CrossingDetail::Virtual,
                CrossingDetail::Ancestor,
            )
        } else {
            (
                CrossingDetail::Nonlinear,
                CrossingDetail::NonlinearVirtual,
                CrossingDetail::Nonlinear,
            )
        };

        if leave {
            if let Some(src) = source {
                push(&mut out, src, true, first);
                if up > 0 {
                    for &w in up_chain.iter().take(up).skip(1) {
                        push(&mut out, w, true, middle);
                    }
                }
            }
        }
        if enter {
            if down > 0 {
                for &w in down_chain.iter().take(down).skip(1).rev() {
                    push(&mut out, w, false, middle);
                }
            }
            if let Some(dst) = dest {
                push(&mut out, dst, false, last);
            }
        }
        out
    }

    /// Drop the button auto-grab and any temporary server grab
    pub fn release_button_grab(&mut self, display: DisplayId) -> Vec<GrabStep> {
        let mut steps = Vec::new();
        let grab = self.displays[display].grab;
        if let Some(button_win) = grab.button_win {
            if grab.server_win != Some(button_win) {
                let crossings =
                    self.crossing_events(Some(button_win), grab.server_win, true, true, CrossingMode::Ungrab);
                if !crossings.is_empty() {
                    steps.push(GrabStep::Crossings(crossings));
                }
            }
        }
        let grab = &mut self.displays[display].grab;
        grab.button_win = None;
        if grab.flags.contains(GrabFlags::TEMP_GLOBAL) {
            grab.flags.remove(GrabFlags::TEMP_GLOBAL);
            steps.push(GrabStep::ReleaseServer);
        }
        steps
    }

    /// Plan the release of the grab held by `window`.
    ///
    /// Returns `None` when `window` is not the eventual grab window.
    pub fn plan_ungrab(&mut self, window: WindowId) -> Option<Vec<GrabStep>> {
        let display = self.windows.get(window)?.display;
        if self.displays[display].grab.eventual != Some(window) {
            return None;
        }
        let mut steps = self.release_button_grab(display);
        steps.push(GrabStep::Commit(None));
        let grab = &mut self.displays[display].grab;
        grab.apply(GrabInput::Ungrab, None);
        if grab.flags.intersects(GrabFlags::GLOBAL | GrabFlags::TEMP_GLOBAL) {
            grab.flags.remove(GrabFlags::GLOBAL | GrabFlags::TEMP_GLOBAL);
            steps.push(GrabStep::ReleaseServer);
        }

        let server_win = self.displays[display].grab.server_win;
        let inside = server_win
            .map(|s| self.position_in_tree(s, window) == TreePosition::InTree)
            .unwrap_or(false);
        if !inside && server_win.map_or(true, |s| self.same_app(s, window)) {
            let crossings = self.crossing_events(Some(window), server_win, false, true, CrossingMode::Ungrab);
            if !crossings.is_empty() {
                steps.push(GrabStep::Crossings(crossings));
            }
        }
        Some(steps)
    }

    /// Grab fixups for a window that is going away
    pub(crate) fn grab_window_died(&mut self, display: DisplayId, win: WindowId) -> Vec<GrabStep> {
        let mut steps = Vec::new();
        let grab = self.displays[display].grab;
        if grab.eventual == Some(win) {
            steps = self.plan_ungrab(win).unwrap_or_default();
        } else if grab.button_win == Some(win) {
            steps = self.release_button_grab(display);
        }
        let top = self
            .windows
            .get(win)
            .map(|r| (r.flags.contains(WindowFlags::TOP_HIERARCHY), r.parent));
        let grab = &mut self.displays[display].grab;
        if grab.server_win == Some(win) {
            grab.server_win = match top {
                Some((false, parent)) => parent,
                _ => None,
            };
        }
        if grab.grab_win == Some(win) {
            grab.grab_win = None;
        }
        steps
    }

    /// Grab policy for a pointer event about to be delivered to `window`.
    ///
    /// May rewrite the detail of crossing events in place.
    pub fn classify_pointer_event(&mut self, window: WindowId, event: &mut WindowEvent) -> Classification {
        let Some(rec) = self.windows.get(window) else {
            return Classification::verdict(PointerVerdict::Suppress);
        };
        let display = rec.display;
        let top_hierarchy = rec.flags.contains(WindowFlags::TOP_HIERARCHY);
        let relation = self.grab_relation(window);
        let grab = self.displays[display].grab;

        match event {
            WindowEvent::Enter(_) | WindowEvent::Leave(_) => {
                classify_crossing(self, display, window, top_hierarchy, relation, grab, event)
            }
            WindowEvent::Motion(_) => {
                if relation == GrabRelation::None {
                    return Classification::verdict(PointerVerdict::Deliver);
                }
                let target = match grab.button_win {
                    Some(b) => b,
                    None if relation.outside() || grab.server_win.is_none() => {
                        grab.grab_win.unwrap_or(window)
                    }
                    None => window,
                };
                if target != window {
                    Classification::verdict(PointerVerdict::Retarget(target))
                } else {
                    Classification::verdict(PointerVerdict::Deliver)
                }
            }
            WindowEvent::ButtonPress { button: _, pointer } => {
                let first = pointer.state & ALL_BUTTONS == 0;
                if relation == GrabRelation::None {
                    let input = if first { GrabInput::FirstPress } else { GrabInput::Press };
                    self.displays[display].grab.apply(input, Some(window));
                    return Classification::verdict(PointerVerdict::Deliver);
                }
                let target = grab.button_win.unwrap_or_else(|| {
                    if relation.outside() {
                        grab.grab_win.unwrap_or(window)
                    } else {
                        window
                    }
                });
                if first {
                    if relation.outside() {
                        if let Some(grab_win) = grab.grab_win {
                            return Classification::verdict(PointerVerdict::Retarget(grab_win));
                        }
                    }
                    self.displays[display].grab.apply(GrabInput::FirstPress, Some(window));
                    let follow_up = if grab.flags.contains(GrabFlags::GLOBAL) {
                        None
                    } else {
                        Some(FollowUp::PromoteTempGlobal(window))
                    };
                    return Classification {
                        verdict: PointerVerdict::Deliver,
                        follow_up,
                    };
                }
                self.displays[display].grab.apply(GrabInput::Press, Some(window));
                Classification::verdict(if target != window {
                    PointerVerdict::Retarget(target)
                } else {
                    PointerVerdict::Deliver
                })
            }
            WindowEvent::ButtonRelease { button, pointer } => {
                let last = pointer.state & ALL_BUTTONS == button_mask(*button);
                if relation == GrabRelation::None {
                    let input = if last { GrabInput::LastRelease } else { GrabInput::Release };
                    self.displays[display].grab.apply(input, Some(window));
                    return Classification::verdict(PointerVerdict::Deliver);
                }
                let target = grab.button_win.unwrap_or_else(|| {
                    if relation.outside() {
                        grab.grab_win.unwrap_or(window)
                    } else {
                        window
                    }
                });
                if last {
                    self.displays[display].grab.buttons_down = false;
                }
                let follow_up = if last {
                    Some(FollowUp::Steps(self.release_button_grab(display)))
                } else {
                    None
                };
                Classification {
                    verdict: if target != window {
                        PointerVerdict::Retarget(target)
                    } else {
                        PointerVerdict::Deliver
                    },
                    follow_up,
                }
            }
            WindowEvent::KeyPress { .. } | WindowEvent::KeyRelease { .. } => {
                if relation == GrabRelation::Excluded || relation == GrabRelation::Ancestor {
                    Classification::verdict(PointerVerdict::Suppress)
                } else {
                    Classification::verdict(PointerVerdict::Deliver)
                }
            }
            _ => Classification::verdict(PointerVerdict::Deliver),
        }
    }
}

fn classify_crossing(
    reg: &mut Registry,
    display: DisplayId,
    window: WindowId,
    top_hierarchy: bool,
    relation: GrabRelation,
    grab: GrabState,
    event: &mut WindowEvent,
) -> Classification {
    let (is_leave, crossing) = match event {
        WindowEvent::Enter(c) => (false, c),
        WindowEvent::Leave(c) => (true, c),
        _ => return Classification::verdict(PointerVerdict::Deliver),
    };

    // Track where the pointer really is; our own synthetic events don't count.
    if !crossing.generated {
        reg.displays[display].grab.server_win = if is_leave && top_hierarchy {
            None
        } else {
            Some(window)
        };
    }

    if grab.grab_win.is_some() {
        if relation.outside() {
            if relation == GrabRelation::Excluded {
                return Classification::verdict(PointerVerdict::Suppress);
            }
            match crossing.detail {
                CrossingDetail::Inferior => return Classification::verdict(PointerVerdict::Suppress),
                CrossingDetail::Ancestor => crossing.detail = CrossingDetail::Virtual,
                CrossingDetail::Nonlinear => crossing.detail = CrossingDetail::NonlinearVirtual,
                _ => {}
            }
        }
        if let Some(button_win) = grab.button_win {
            if button_win != window {
                return Classification::verdict(PointerVerdict::Suppress);
            }
        }
    }
    Classification::verdict(PointerVerdict::Deliver)
}

impl Toolkit {
    /// Set a grab on `window`.
    ///
    /// A global grab takes over the server pointer and keyboard; a local grab
    /// only affects event routing within this process.
    pub fn grab(&mut self, window: WindowId, global: bool) -> Result<()> {
        let display = self.registry.get(window).ok_or_else(|| self.no_such_window(window))?.display;
        let steps = self.registry.release_button_grab(display);
        self.run_grab_steps(display, steps)?;

        let state = self.registry.display(display).grab;
        if let Some(current) = state.eventual {
            if current == window && global == state.flags.contains(GrabFlags::GLOBAL) {
                return Ok(());
            }
            if !self.registry.same_app(current, window) {
                return Err(GrabError::AlreadyGrabbed.into());
            }
            self.ungrab(current)?;
        }

        let xid = self.make_exist(window)?;
        let saved_flags = self.registry.display(display).grab.flags;
        let server_grab = if global {
            true
        } else {
            let pointer = self.query_pointer(display, xid)?;
            pointer.state & ALL_BUTTONS != 0
        };

        if server_grab {
            if let Err(e) = self.grab_server_input(display, xid) {
                self.registry.display_mut(display).grab.flags = saved_flags;
                return Err(e);
            }
        }
        {
            let flags = &mut self.registry.display_mut(display).grab.flags;
            flags.remove(GrabFlags::GLOBAL | GrabFlags::TEMP_GLOBAL);
            if global {
                flags.insert(GrabFlags::GLOBAL);
            } else if server_grab {
                flags.insert(GrabFlags::TEMP_GLOBAL);
            }
        }

        let server_win = self.registry.display(display).grab.server_win;
        if let Some(server_win) = server_win {
            if self.registry.same_app(server_win, window)
                && self.registry.position_in_tree(server_win, window) != TreePosition::InTree
            {
                let crossings =
                    self.registry
                        .crossing_events(Some(server_win), Some(window), true, false, CrossingMode::Grab);
                self.queue_crossings(display, crossings)?;
            }
        }

        let from = self.registry.display(display).grab.phase();
        self.registry.display_mut(display).grab.apply(GrabInput::Grab, Some(window));
        self.queue.push(
            QueuePosition::Mark,
            QueuedEvent::GrabCommit {
                display,
                window: Some(window),
            },
        );
        log::debug!(
            "{} grab set on {}",
            if global { "global" } else { "local" },
            self.registry.path(window)
        );
        let to = self.registry.display(display).grab.phase();
        self.trace_grab(from, to, window);
        Ok(())
    }

    /// Release the grab on `window`; no-op unless it holds the grab
    pub fn ungrab(&mut self, window: WindowId) -> Result<()> {
        let Some(display) = self.registry.get(window).map(|r| r.display) else {
            return Ok(());
        };
        let from = self.registry.display(display).grab.phase();
        let Some(steps) = self.registry.plan_ungrab(window) else {
            return Ok(());
        };
        self.run_grab_steps(display, steps)?;
        log::debug!("grab released on {}", self.registry.path(window));
        let to = self.registry.display(display).grab.phase();
        self.trace_grab(from, to, window);
        Ok(())
    }

    /// "none", "local" or "global"
    pub fn grab_status(&self, window: WindowId) -> &'static str {
        let Some(rec) = self.registry.get(window) else {
            return "none";
        };
        let grab = &self.registry.display(rec.display).grab;
        if grab.eventual != Some(window) {
            "none"
        } else if grab.flags.contains(GrabFlags::GLOBAL) {
            "global"
        } else {
            "local"
        }
    }

    /// Eventual grab windows, for one display or all of them
    pub fn grab_current(&self, display: Option<DisplayId>) -> Vec<WindowId> {
        match display {
            Some(d) => self.registry.display(d).grab.eventual.into_iter().collect(),
            None => self
                .registry
                .displays
                .values()
                .filter_map(|d| d.grab.eventual)
                .collect(),
        }
    }

    fn trace_grab(&mut self, from: GrabPhase, to: GrabPhase, window: WindowId) {
        if from != to {
            let xid = self.registry.get(window).and_then(|r| r.xid);
            self.tracer.trace_transition(&StateTransition::GrabChanged {
                from,
                to,
                window: xid,
            });
        }
    }

    /// Grab pointer and keyboard on the server, retrying while another
    /// client (usually the window manager) still holds the pointer
    fn grab_server_input(&mut self, display: DisplayId, xid: Window) -> Result<()> {
        let retries = self.config.grab.retries.max(1);
        let delay = self.config.grab.retry_delay();
        let serial;
        {
            let dc = self.conn(display)?;
            dc.conn.ungrab_pointer(x11rb::CURRENT_TIME)?;
            let mut attempt = 0;
            loop {
                let cookie = dc.conn.grab_pointer(
                    true,
                    xid,
                    EventMask::BUTTON_PRESS
                        | EventMask::BUTTON_RELEASE
                        | EventMask::BUTTON_MOTION
                        | EventMask::POINTER_MOTION,
                    GrabMode::ASYNC,
                    GrabMode::ASYNC,
                    x11rb::NONE,
                    x11rb::NONE,
                    x11rb::CURRENT_TIME,
                )?;
                let seq = cookie.sequence_number();
                let status = cookie.reply()?.status;
                attempt += 1;
                if status == GrabStatus::ALREADY_GRABBED && attempt < retries {
                    log::debug!("pointer already grabbed, retry {}/{}", attempt, retries);
                    std::thread::sleep(delay);
                    continue;
                }
                if let Some(err) = GrabError::from_status(status) {
                    return Err(err.into());
                }
                serial = seq;
                break;
            }
            let status = dc
                .conn
                .grab_keyboard(false, xid, x11rb::CURRENT_TIME, GrabMode::ASYNC, GrabMode::ASYNC)?
                .reply()?
                .status;
            if let Some(err) = GrabError::from_status(status) {
                dc.conn.ungrab_pointer(x11rb::CURRENT_TIME)?;
                return Err(err.into());
            }
        }
        self.eat_grab_events(display, serial)
    }

    fn release_server_input(&mut self, display: DisplayId) -> Result<()> {
        let serial = {
            let dc = self.conn(display)?;
            let serial = dc.conn.ungrab_pointer(x11rb::CURRENT_TIME)?.sequence_number();
            dc.conn.ungrab_keyboard(x11rb::CURRENT_TIME)?;
            serial
        };
        self.eat_grab_events(display, serial)
    }

    /// Discard the grab/ungrab crossing and focus events caused by requests
    /// issued at or after `serial`
    pub(crate) fn eat_grab_events(&mut self, display: DisplayId, serial: u64) -> Result<()> {
        self.sync(display)?;
        self.pump(display, &WaitFor::GrabEvents { serial }, Duration::ZERO, |_| false)?;
        Ok(())
    }

    /// Execute planned grab steps in order
    pub(crate) fn run_grab_steps(&mut self, display: DisplayId, steps: Vec<GrabStep>) -> Result<()> {
        for step in steps {
            match step {
                GrabStep::Crossings(crossings) => self.queue_crossings(display, crossings)?,
                GrabStep::ReleaseServer => {
                    if let Err(e) = self.release_server_input(display) {
                        if !matches!(e, XtkError::NotConnected(_)) {
                            return Err(e);
                        }
                    }
                }
                GrabStep::Commit(window) => {
                    self.queue
                        .push(QueuePosition::Mark, QueuedEvent::GrabCommit { display, window });
                }
            }
        }
        Ok(())
    }

    /// Queue synthetic crossing events at the mark, stamped with the
    /// current pointer position
    pub(crate) fn queue_crossings(&mut self, display: DisplayId, crossings: Vec<SyntheticCrossing>) -> Result<()> {
        if crossings.is_empty() {
            return Ok(());
        }
        let pointer = match self.registry.get(crossings[0].window).and_then(|r| r.xid) {
            Some(xid) => self.query_pointer(display, xid).unwrap_or_default(),
            None => Pointer::default(),
        };
        for c in crossings {
            let crossing = Crossing {
                detail: c.detail,
                mode: c.mode,
                pointer,
                generated: true,
            };
            let event = if c.leave {
                WindowEvent::Leave(crossing)
            } else {
                WindowEvent::Enter(crossing)
            };
            self.queue.push(
                QueuePosition::Mark,
                QueuedEvent::Window {
                    display,
                    window: c.window,
                    event,
                },
            );
        }
        Ok(())
    }

    /// Run the side effects of a pointer classification
    pub(crate) fn run_follow_up(&mut self, display: DisplayId, follow_up: FollowUp) -> Result<()> {
        match follow_up {
            FollowUp::Steps(steps) => self.run_grab_steps(display, steps),
            FollowUp::PromoteTempGlobal(window) => {
                let Some(xid) = self.registry.get(window).and_then(|r| r.xid) else {
                    return Ok(());
                };
                // Best effort: a refused promotion leaves the local grab as it
                // was and is only logged.
                match self.promote_temp_global(display, xid) {
                    Ok(true) => {
                        self.registry
                            .display_mut(display)
                            .grab
                            .flags
                            .insert(GrabFlags::TEMP_GLOBAL);
                    }
                    Ok(false) => log::debug!("temporary global grab refused by server"),
                    Err(e) => log::debug!("temporary global grab failed: {}", e),
                }
                Ok(())
            }
        }
    }

    fn promote_temp_global(&mut self, display: DisplayId, xid: Window) -> Result<bool> {
        let serial;
        {
            let dc = self.conn(display)?;
            let cookie = dc.conn.grab_pointer(
                true,
                xid,
                EventMask::BUTTON_PRESS
                    | EventMask::BUTTON_RELEASE
                    | EventMask::BUTTON_MOTION
                    | EventMask::POINTER_MOTION,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                x11rb::NONE,
                x11rb::CURRENT_TIME,
            )?;
            serial = cookie.sequence_number();
            if cookie.reply()?.status != GrabStatus::SUCCESS {
                return Ok(false);
            }
        }
        self.eat_grab_events(display, serial)?;
        let dc = self.conn(display)?;
        let status = dc
            .conn
            .grab_keyboard(false, xid, x11rb::CURRENT_TIME, GrabMode::ASYNC, GrabMode::ASYNC)?
            .reply()?
            .status;
        if status == GrabStatus::SUCCESS {
            Ok(true)
        } else {
            dc.conn.ungrab_pointer(x11rb::CURRENT_TIME)?;
            dc.conn.flush()?;
            Ok(false)
        }
    }

    /// Current pointer position and button state relative to `xid`
    pub(crate) fn query_pointer(&self, display: DisplayId, xid: Window) -> Result<Pointer> {
        let dc = self.conn(display)?;
        let reply = dc.conn.query_pointer(xid)?.reply()?;
        Ok(Pointer {
            x: reply.win_x as i32,
            y: reply.win_y as i32,
            root_x: reply.root_x as i32,
            root_y: reply.root_y as i32,
            state: u16::from(reply.mask),
            time: x11rb::CURRENT_TIME,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::registry_with_app;

    fn state_after(inputs: &[GrabInput], w: WindowId) -> GrabState {
        let mut s = GrabState::default();
        for &i in inputs {
            s.apply(i, Some(w));
        }
        s
    }

    /// Expected next phase per the transition table
    fn table(phase: GrabPhase, input: GrabInput) -> GrabPhase {
        use GrabInput::*;
        use GrabPhase::*;
        match (input, phase) {
            (FirstPress, Ungrabbed | Button) => Button,
            (FirstPress, Grabbed | GrabAndButton) => GrabAndButton,
            (Press, Ungrabbed | Button) => Button,
            (Press, Grabbed) => Grabbed,
            (Press, GrabAndButton) => GrabAndButton,
            (Release, p) => p,
            (LastRelease, Ungrabbed | Button) => Ungrabbed,
            (LastRelease, Grabbed | GrabAndButton) => Grabbed,
            (Grab, _) => Grabbed,
            (Ungrab, Button) => Button,
            (Ungrab, _) => Ungrabbed,
        }
    }

    #[test]
    fn test_state_table_all_sequences() {
        let (_, _, _, main) = registry_with_app();
        let inputs = [
            GrabInput::FirstPress,
            GrabInput::Press,
            GrabInput::Release,
            GrabInput::LastRelease,
            GrabInput::Grab,
            GrabInput::Ungrab,
        ];
        // every sequence of length 5 over the six inputs
        for n in 0..inputs.len().pow(5) {
            let mut s = GrabState::default();
            let mut expected = GrabPhase::Ungrabbed;
            let mut k = n;
            for _ in 0..5 {
                let input = inputs[k % inputs.len()];
                k /= inputs.len();
                s.apply(input, Some(main));
                expected = table(expected, input);
                assert_eq!(s.phase(), expected, "sequence index {}", n);
                let p = s.phase();
                assert_eq!(
                    s.eventual.is_some(),
                    matches!(p, GrabPhase::Grabbed | GrabPhase::GrabAndButton)
                );
                assert_eq!(
                    s.button_win.is_some(),
                    matches!(p, GrabPhase::Button | GrabPhase::GrabAndButton)
                );
                match p {
                    GrabPhase::Ungrabbed => assert!(!s.captured()),
                    GrabPhase::Button | GrabPhase::GrabAndButton => assert!(s.captured()),
                    GrabPhase::Grabbed => assert_eq!(
                        s.captured(),
                        s.buttons_down || s.flags.contains(GrabFlags::GLOBAL)
                    ),
                }
            }
        }
    }

    #[test]
    fn test_grab_clears_restrict_window() {
        let (_, _, _, main) = registry_with_app();
        let s = state_after(&[GrabInput::FirstPress, GrabInput::Grab], main);
        assert_eq!(s.phase(), GrabPhase::Grabbed);
        assert!(s.button_win.is_none());
        // button still down, so the server keeps the pointer
        assert!(s.captured());
    }

    #[test]
    fn test_button_mask() {
        assert_eq!(button_mask(1), 0x100);
        assert_eq!(button_mask(5), 0x1000);
        assert_eq!(button_mask(6), 0);
        assert_eq!(button_mask(1) | button_mask(5), button_mask(1) ^ button_mask(5));
    }

    fn with_xids(reg: &mut Registry, wins: &[WindowId]) {
        for (i, &w) in wins.iter().enumerate() {
            reg.set_xid(w, 0x400000 + i as u32);
        }
    }

    #[test]
    fn test_crossings_source_inside_dest() {
        let (mut reg, _, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(a, "b").unwrap();
        let c = reg.create_child(b, "c").unwrap();
        with_xids(&mut reg, &[main, a, b, c]);

        let events = reg.crossing_events(Some(c), Some(a), true, true, CrossingMode::Grab);
        let got: Vec<_> = events.iter().map(|e| (e.window, e.leave, e.detail)).collect();
        assert_eq!(
            got,
            vec![
                (c, true, CrossingDetail::Ancestor),
                (b, true, CrossingDetail::Virtual),
                (a, false, CrossingDetail::Inferior),
            ]
        );
    }

    #[test]
    fn test_crossings_dest_inside_source() {
        let (mut reg, _, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(a, "b").unwrap();
        let c = reg.create_child(b, "c").unwrap();
        with_xids(&mut reg, &[main, a, b, c]);

        let events = reg.crossing_events(Some(a), Some(c), true, true, CrossingMode::Ungrab);
        let got: Vec<_> = events.iter().map(|e| (e.window, e.leave, e.detail)).collect();
        assert_eq!(
            got,
            vec![
                (a, true, CrossingDetail::Inferior),
                (b, false, CrossingDetail::Virtual),
                (c, false, CrossingDetail::Ancestor),
            ]
        );
    }

    #[test]
    fn test_crossings_nonlinear() {
        let (mut reg, _, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let a1 = reg.create_child(a, "x").unwrap();
        let b = reg.create_child(main, "b").unwrap();
        let b1 = reg.create_child(b, "y").unwrap();
        with_xids(&mut reg, &[main, a, a1, b, b1]);

        let events = reg.crossing_events(Some(a1), Some(b1), true, true, CrossingMode::Normal);
        let got: Vec<_> = events.iter().map(|e| (e.window, e.leave, e.detail)).collect();
        assert_eq!(
            got,
            vec![
                (a1, true, CrossingDetail::Nonlinear),
                (a, true, CrossingDetail::NonlinearVirtual),
                (b, false, CrossingDetail::NonlinearVirtual),
                (b1, false, CrossingDetail::Nonlinear),
            ]
        );
    }

    #[test]
    fn test_crossings_leave_only_and_unrealized() {
        let (mut reg, _, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(a, "b").unwrap();
        // b has no protocol window and gets nothing
        with_xids(&mut reg, &[main, a]);
        let events = reg.crossing_events(Some(b), Some(main), true, false, CrossingMode::Grab);
        let got: Vec<_> = events.iter().map(|e| (e.window, e.leave, e.detail)).collect();
        assert_eq!(got, vec![(a, true, CrossingDetail::Virtual)]);
    }

    fn grabbed(reg: &mut Registry, display: DisplayId, window: WindowId, global: bool) {
        let g = &mut reg.display_mut(display).grab;
        g.apply(GrabInput::Grab, Some(window));
        g.grab_win = Some(window);
        if global {
            g.flags.insert(GrabFlags::GLOBAL);
        }
    }

    fn crossing(detail: CrossingDetail) -> Crossing {
        Crossing {
            detail,
            mode: CrossingMode::Normal,
            pointer: Pointer::default(),
            generated: false,
        }
    }

    #[test]
    fn test_classify_crossing_rewrites_detail_for_ancestor() {
        let (mut reg, display, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(main, "b").unwrap();
        grabbed(&mut reg, display, a, false);

        let mut ev = WindowEvent::Enter(crossing(CrossingDetail::Ancestor));
        let c = reg.classify_pointer_event(main, &mut ev);
        assert_eq!(c.verdict, PointerVerdict::Deliver);
        assert_eq!(ev, WindowEvent::Enter(crossing(CrossingDetail::Virtual)));

        let mut ev = WindowEvent::Leave(crossing(CrossingDetail::Nonlinear));
        reg.classify_pointer_event(main, &mut ev);
        assert_eq!(ev, WindowEvent::Leave(crossing(CrossingDetail::NonlinearVirtual)));

        let mut ev = WindowEvent::Leave(crossing(CrossingDetail::Inferior));
        assert_eq!(
            reg.classify_pointer_event(main, &mut ev).verdict,
            PointerVerdict::Suppress
        );

        // sibling of the grab window is excluded
        let mut ev = WindowEvent::Enter(crossing(CrossingDetail::Nonlinear));
        assert_eq!(reg.classify_pointer_event(b, &mut ev).verdict, PointerVerdict::Suppress);
        // the pointer really is in b now
        assert_eq!(reg.display(display).grab.server_win, Some(b));
    }

    #[test]
    fn test_classify_crossing_button_window_only() {
        let (mut reg, display, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let a1 = reg.create_child(a, "x").unwrap();
        grabbed(&mut reg, display, a, false);
        reg.display_mut(display).grab.button_win = Some(a1);

        let mut ev = WindowEvent::Enter(crossing(CrossingDetail::Ancestor));
        assert_eq!(reg.classify_pointer_event(a, &mut ev).verdict, PointerVerdict::Suppress);
        let mut ev = WindowEvent::Enter(crossing(CrossingDetail::Ancestor));
        assert_eq!(reg.classify_pointer_event(a1, &mut ev).verdict, PointerVerdict::Deliver);
    }

    #[test]
    fn test_leave_of_toplevel_clears_server_window() {
        let (mut reg, display, _, main) = registry_with_app();
        let mut ev = WindowEvent::Enter(crossing(CrossingDetail::Nonlinear));
        reg.classify_pointer_event(main, &mut ev);
        assert_eq!(reg.display(display).grab.server_win, Some(main));
        let mut ev = WindowEvent::Leave(crossing(CrossingDetail::Nonlinear));
        reg.classify_pointer_event(main, &mut ev);
        assert_eq!(reg.display(display).grab.server_win, None);

        // synthetic events never move the server window
        let mut generated = crossing(CrossingDetail::Nonlinear);
        generated.generated = true;
        let mut ev = WindowEvent::Enter(generated);
        reg.classify_pointer_event(main, &mut ev);
        assert_eq!(reg.display(display).grab.server_win, None);
    }

    #[test]
    fn test_classify_motion() {
        let (mut reg, display, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let a1 = reg.create_child(a, "x").unwrap();
        let b = reg.create_child(main, "b").unwrap();

        // no grab: delivered as-is
        let mut ev = WindowEvent::Motion(Pointer::default());
        assert_eq!(reg.classify_pointer_event(b, &mut ev).verdict, PointerVerdict::Deliver);

        grabbed(&mut reg, display, a, false);
        reg.display_mut(display).grab.server_win = Some(a1);
        assert_eq!(
            reg.classify_pointer_event(b, &mut ev).verdict,
            PointerVerdict::Retarget(a)
        );
        assert_eq!(reg.classify_pointer_event(a1, &mut ev).verdict, PointerVerdict::Deliver);

        // unknown pointer window sends motion to the grab window
        reg.display_mut(display).grab.server_win = None;
        assert_eq!(
            reg.classify_pointer_event(a1, &mut ev).verdict,
            PointerVerdict::Retarget(a)
        );

        reg.display_mut(display).grab.button_win = Some(a1);
        assert_eq!(
            reg.classify_pointer_event(b, &mut ev).verdict,
            PointerVerdict::Retarget(a1)
        );
    }

    #[test]
    fn test_first_press_outside_grab_goes_to_grab_window() {
        let (mut reg, display, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(main, "b").unwrap();
        grabbed(&mut reg, display, a, false);

        let mut ev = WindowEvent::ButtonPress {
            button: 1,
            pointer: Pointer::default(),
        };
        let c = reg.classify_pointer_event(b, &mut ev);
        assert_eq!(c.verdict, PointerVerdict::Retarget(a));
        assert!(reg.display(display).grab.button_win.is_none());

        // requeued on the grab window: becomes the button window, asks for promotion
        let c = reg.classify_pointer_event(a, &mut ev);
        assert_eq!(c.verdict, PointerVerdict::Deliver);
        assert_eq!(c.follow_up, Some(FollowUp::PromoteTempGlobal(a)));
        assert_eq!(reg.display(display).grab.button_win, Some(a));
        assert_eq!(reg.display(display).grab.phase(), GrabPhase::GrabAndButton);
    }

    #[test]
    fn test_no_promotion_under_global_grab() {
        let (mut reg, display, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        grabbed(&mut reg, display, a, true);
        let mut ev = WindowEvent::ButtonPress {
            button: 1,
            pointer: Pointer::default(),
        };
        let c = reg.classify_pointer_event(a, &mut ev);
        assert_eq!(c.follow_up, None);
    }

    #[test]
    fn test_last_release_releases_button_grab() {
        let (mut reg, display, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let a1 = reg.create_child(a, "x").unwrap();
        with_xids(&mut reg, &[main, a, a1]);
        grabbed(&mut reg, display, a, false);
        {
            let g = &mut reg.display_mut(display).grab;
            g.button_win = Some(a1);
            g.server_win = Some(a);
            g.flags.insert(GrabFlags::TEMP_GLOBAL);
        }

        let mut ev = WindowEvent::ButtonRelease {
            button: 1,
            pointer: Pointer {
                state: button_mask(1),
                ..Pointer::default()
            },
        };
        let c = reg.classify_pointer_event(a, &mut ev);
        // routed to the window the button went down in
        assert_eq!(c.verdict, PointerVerdict::Retarget(a1));
        let Some(FollowUp::Steps(steps)) = c.follow_up else {
            panic!("expected release steps");
        };
        assert_eq!(steps.len(), 2);
        assert!(matches!(&steps[0], GrabStep::Crossings(c) if c.len() == 2));
        assert_eq!(steps[1], GrabStep::ReleaseServer);
        let g = reg.display(display).grab;
        assert!(g.button_win.is_none());
        assert!(!g.flags.contains(GrabFlags::TEMP_GLOBAL));
    }

    #[test]
    fn test_other_app_local_grab_is_ignored() {
        let (mut reg, display, _, main) = registry_with_app();
        let (_, other) = reg.create_main_window(display, 0, "Other");
        grabbed(&mut reg, display, main, false);
        assert_eq!(reg.grab_relation(other), GrabRelation::None);
        reg.display_mut(display).grab.flags.insert(GrabFlags::GLOBAL);
        assert_eq!(reg.grab_relation(other), GrabRelation::Excluded);
    }

    #[test]
    fn test_plan_ungrab() {
        let (mut reg, display, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        let b = reg.create_child(main, "b").unwrap();
        with_xids(&mut reg, &[main, a, b]);
        assert!(reg.plan_ungrab(a).is_none());

        grabbed(&mut reg, display, a, true);
        reg.display_mut(display).grab.server_win = Some(b);
        assert!(reg.plan_ungrab(b).is_none());

        let steps = reg.plan_ungrab(a).unwrap();
        assert_eq!(steps[0], GrabStep::Commit(None));
        assert_eq!(steps[1], GrabStep::ReleaseServer);
        let GrabStep::Crossings(enters) = &steps[2] else {
            panic!("expected enter events");
        };
        assert!(enters.iter().all(|c| !c.leave));
        assert_eq!(enters.last().map(|c| c.window), Some(b));
        let g = reg.display(display).grab;
        assert_eq!(g.eventual, None);
        assert!(g.flags.is_empty());
    }

    #[test]
    fn test_grab_window_death_releases_grab() {
        let (mut reg, display, _, main) = registry_with_app();
        let a = reg.create_child(main, "a").unwrap();
        grabbed(&mut reg, display, a, true);
        reg.display_mut(display).grab.server_win = Some(a);
        let report = reg.destroy(a);
        assert_eq!(report.grab_cleanups.len(), 1);
        let (_, steps) = &report.grab_cleanups[0];
        assert!(steps.contains(&GrabStep::Commit(None)));
        assert!(steps.contains(&GrabStep::ReleaseServer));
        let g = reg.display(display).grab;
        assert_eq!(g.eventual, None);
        assert_eq!(g.grab_win, None);
        assert_eq!(g.server_win, Some(main));
    }
}
