//! Event translation and the process event queue.
//!
//! Server events from every open display are drained by a check phase into a
//! single ordered queue. Dispatch translates them into [`WindowEvent`]s, runs
//! them past the grab layer and delivers the survivors to the host. The grab
//! and window-manager layers push synthetic events at the queue head or
//! behind the queue mark; everything else keeps server order.

use std::collections::VecDeque;
use std::time::Duration;

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    ButtonPressEvent, ConnectionExt, EnterNotifyEvent, KeyButMask, KeyPressEvent, MotionNotifyEvent,
    NotifyDetail, NotifyMode, Property, Window,
};
use x11rb::protocol::Event;

use crate::error::Result;
use crate::grab::PointerVerdict;
use crate::registry::{DisplayId, Registry, WindowFlags, WindowId};
use crate::toolkit::Toolkit;

/// Notify detail of a crossing or focus event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingDetail {
    Ancestor,
    Virtual,
    Inferior,
    Nonlinear,
    NonlinearVirtual,
    Pointer,
    PointerRoot,
    None,
}

impl CrossingDetail {
    pub fn from_x11(detail: NotifyDetail) -> Self {
        match detail {
            NotifyDetail::ANCESTOR => CrossingDetail::Ancestor,
            NotifyDetail::VIRTUAL => CrossingDetail::Virtual,
            NotifyDetail::INFERIOR => CrossingDetail::Inferior,
            NotifyDetail::NONLINEAR => CrossingDetail::Nonlinear,
            NotifyDetail::NONLINEAR_VIRTUAL => CrossingDetail::NonlinearVirtual,
            NotifyDetail::POINTER => CrossingDetail::Pointer,
            NotifyDetail::POINTER_ROOT => CrossingDetail::PointerRoot,
            _ => CrossingDetail::None,
        }
    }
}

/// Notify mode of a crossing or focus event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingMode {
    Normal,
    Grab,
    Ungrab,
    WhileGrabbed,
}

impl CrossingMode {
    pub fn from_x11(mode: NotifyMode) -> Self {
        match mode {
            NotifyMode::GRAB => CrossingMode::Grab,
            NotifyMode::UNGRAB => CrossingMode::Ungrab,
            NotifyMode::WHILE_GRABBED => CrossingMode::WhileGrabbed,
            _ => CrossingMode::Normal,
        }
    }
}

/// Pointer position and modifier/button state carried by input events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pointer {
    /// Position relative to the event window
    pub x: i32,
    pub y: i32,
    pub root_x: i32,
    pub root_y: i32,
    /// Key and button state before the event
    pub state: u16,
    pub time: u32,
}

impl Pointer {
    fn new(x: i16, y: i16, root_x: i16, root_y: i16, state: KeyButMask, time: u32) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            root_x: root_x.into(),
            root_y: root_y.into(),
            state: u16::from(state),
            time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub detail: CrossingDetail,
    pub mode: CrossingMode,
    pub pointer: Pointer,
    /// Synthesized by the grab layer rather than reported by the server
    pub generated: bool,
}

/// Logical event as delivered to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    /// New geometry; root-relative for toplevels
    Configure {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        border_width: i32,
    },
    Map,
    Unmap,
    Destroy,
    Enter(Crossing),
    Leave(Crossing),
    Motion(Pointer),
    ButtonPress { button: u8, pointer: Pointer },
    ButtonRelease { button: u8, pointer: Pointer },
    KeyPress { keycode: u8, pointer: Pointer },
    KeyRelease { keycode: u8, pointer: Pointer },
    FocusIn { detail: CrossingDetail },
    FocusOut { detail: CrossingDetail },
    Property { atom: u32, deleted: bool },
    Expose,
}

impl WindowEvent {
    fn pointer_mut(&mut self) -> Option<&mut Pointer> {
        match self {
            WindowEvent::Enter(c) | WindowEvent::Leave(c) => Some(&mut c.pointer),
            WindowEvent::Motion(p)
            | WindowEvent::ButtonPress { pointer: p, .. }
            | WindowEvent::ButtonRelease { pointer: p, .. }
            | WindowEvent::KeyPress { pointer: p, .. }
            | WindowEvent::KeyRelease { pointer: p, .. } => Some(p),
            _ => None,
        }
    }

    /// Whether the grab layer gets a say before delivery
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            WindowEvent::Enter(_)
                | WindowEvent::Leave(_)
                | WindowEvent::Motion(_)
                | WindowEvent::ButtonPress { .. }
                | WindowEvent::ButtonRelease { .. }
                | WindowEvent::KeyPress { .. }
                | WindowEvent::KeyRelease { .. }
        )
    }
}

/// An event delivered to the host, in processing order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub window: WindowId,
    pub path: String,
    pub event: WindowEvent,
}

/// Entry of the process event queue
#[derive(Debug, Clone)]
pub enum QueuedEvent {
    /// Event read from a server connection
    X {
        display: DisplayId,
        event: Event,
        /// Full sequence number of the last request the server had processed
        serial: u64,
        /// Keyboard focus resolved when the event was read
        focus: Option<WindowId>,
    },
    /// Synthetic or retargeted event for a logical window
    Window {
        display: DisplayId,
        window: WindowId,
        event: WindowEvent,
    },
    /// Commit of the eventual grab window
    GrabCommit {
        display: DisplayId,
        window: Option<WindowId>,
    },
}

impl QueuedEvent {
    pub fn display(&self) -> DisplayId {
        match self {
            QueuedEvent::X { display, .. }
            | QueuedEvent::Window { display, .. }
            | QueuedEvent::GrabCommit { display, .. } => *display,
        }
    }
}

/// Where [`EventQueue::push`] inserts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    Head,
    /// After the previous mark insertion (or at the head if none is left);
    /// the new event becomes the mark
    Mark,
    Tail,
}

/// Ordered event queue with stable entry ids
#[derive(Debug, Default)]
pub struct EventQueue {
    entries: VecDeque<(u64, QueuedEvent)>,
    next_id: u64,
    mark: Option<u64>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, position: QueuePosition, event: QueuedEvent) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        match position {
            QueuePosition::Head => self.entries.push_front((id, event)),
            QueuePosition::Tail => self.entries.push_back((id, event)),
            QueuePosition::Mark => {
                let at = self
                    .mark
                    .and_then(|m| self.index_of(m))
                    .map_or(0, |i| i + 1);
                self.entries.insert(at, (id, event));
                self.mark = Some(id);
            }
        }
        id
    }

    pub fn pop_front(&mut self) -> Option<QueuedEvent> {
        let (id, _) = self.entries.front()?;
        let id = *id;
        self.remove(id)
    }

    /// Remove an entry; a removed mark moves to the entry before it
    pub fn remove(&mut self, id: u64) -> Option<QueuedEvent> {
        let idx = self.index_of(id)?;
        if self.mark == Some(id) {
            self.mark = idx.checked_sub(1).map(|prev| self.entries[prev].0);
        }
        self.entries.remove(idx).map(|(_, ev)| ev)
    }

    pub fn get(&self, id: u64) -> Option<&QueuedEvent> {
        self.index_of(id).map(|i| &self.entries[i].1)
    }

    /// Snapshot of the entry ids in queue order
    pub fn ids(&self) -> Vec<u64> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedEvent> {
        self.entries.iter().map(|(_, ev)| ev)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_of(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|(i, _)| *i == id)
    }
}

/// Input-method hook run on key events before they are queued
pub trait InputFilter {
    /// Return `true` if the event was consumed
    fn filter_key(&mut self, display: DisplayId, focus: Option<WindowId>, event: &Event) -> bool;
}

/// Filter that lets every key event through
pub struct NoInputMethod;

impl InputFilter for NoInputMethod {
    fn filter_key(&mut self, _display: DisplayId, _focus: Option<WindowId>, _event: &Event) -> bool {
        false
    }
}

/// Name of an X event for tracing
pub fn event_name(event: &Event) -> &'static str {
    match event {
        Event::ConfigureNotify(_) => "ConfigureNotify",
        Event::MapNotify(_) => "MapNotify",
        Event::UnmapNotify(_) => "UnmapNotify",
        Event::ReparentNotify(_) => "ReparentNotify",
        Event::DestroyNotify(_) => "DestroyNotify",
        Event::PropertyNotify(_) => "PropertyNotify",
        Event::ClientMessage(_) => "ClientMessage",
        Event::EnterNotify(_) => "EnterNotify",
        Event::LeaveNotify(_) => "LeaveNotify",
        Event::MotionNotify(_) => "MotionNotify",
        Event::ButtonPress(_) => "ButtonPress",
        Event::ButtonRelease(_) => "ButtonRelease",
        Event::KeyPress(_) => "KeyPress",
        Event::KeyRelease(_) => "KeyRelease",
        Event::FocusIn(_) => "FocusIn",
        Event::FocusOut(_) => "FocusOut",
        Event::Expose(_) => "Expose",
        Event::Error(_) => "Error",
        _ => "Other",
    }
}

/// The window an event is about, for id lookup
pub fn event_window(event: &Event) -> Option<Window> {
    Some(match event {
        Event::ConfigureNotify(e) => e.window,
        Event::MapNotify(e) => e.window,
        Event::UnmapNotify(e) => e.window,
        Event::ReparentNotify(e) => e.window,
        Event::DestroyNotify(e) => e.window,
        Event::PropertyNotify(e) => e.window,
        Event::ClientMessage(e) => e.window,
        Event::EnterNotify(e) | Event::LeaveNotify(e) => e.event,
        Event::MotionNotify(e) => e.event,
        Event::ButtonPress(e) | Event::ButtonRelease(e) => e.event,
        Event::KeyPress(e) | Event::KeyRelease(e) => e.event,
        Event::FocusIn(e) | Event::FocusOut(e) => e.event,
        Event::Expose(e) => e.window,
        _ => return None,
    })
}

fn crossing(e: &EnterNotifyEvent) -> Crossing {
    Crossing {
        detail: CrossingDetail::from_x11(e.detail),
        mode: CrossingMode::from_x11(e.mode),
        pointer: Pointer::new(e.event_x, e.event_y, e.root_x, e.root_y, e.state, e.time),
        generated: false,
    }
}

fn motion(e: &MotionNotifyEvent) -> Pointer {
    Pointer::new(e.event_x, e.event_y, e.root_x, e.root_y, e.state, e.time)
}

fn button(e: &ButtonPressEvent) -> (u8, Pointer) {
    (
        e.detail,
        Pointer::new(e.event_x, e.event_y, e.root_x, e.root_y, e.state, e.time),
    )
}

fn key(e: &KeyPressEvent) -> (u8, Pointer) {
    (
        e.detail,
        Pointer::new(e.event_x, e.event_y, e.root_x, e.root_y, e.state, e.time),
    )
}

/// Translate the input events the grab layer classifies
pub fn translate_input(event: &Event) -> Option<WindowEvent> {
    Some(match event {
        Event::EnterNotify(e) => WindowEvent::Enter(crossing(e)),
        Event::LeaveNotify(e) => WindowEvent::Leave(crossing(e)),
        Event::MotionNotify(e) => WindowEvent::Motion(motion(e)),
        Event::ButtonPress(e) => {
            let (button, pointer) = button(e);
            WindowEvent::ButtonPress { button, pointer }
        }
        Event::ButtonRelease(e) => {
            let (button, pointer) = button(e);
            WindowEvent::ButtonRelease { button, pointer }
        }
        Event::KeyPress(e) => {
            let (keycode, pointer) = key(e);
            WindowEvent::KeyPress { keycode, pointer }
        }
        Event::KeyRelease(e) => {
            let (keycode, pointer) = key(e);
            WindowEvent::KeyRelease { keycode, pointer }
        }
        _ => return None,
    })
}

impl Registry {
    /// Root coordinates of the origin of `win`'s contents
    pub fn root_position(&self, win: WindowId) -> (i32, i32) {
        let (mut x, mut y) = (0, 0);
        let mut cur = win;
        loop {
            let Some(rec) = self.windows.get(cur) else {
                break;
            };
            x += rec.changes.x + rec.changes.border_width;
            y += rec.changes.y + rec.changes.border_width;
            if rec.flags.contains(WindowFlags::MENUBAR) {
                let Some(owner) = rec.owner else { break };
                y -= self.wm(owner).map_or(0, |wm| wm.menu_height);
                cur = owner;
                continue;
            }
            if rec.flags.contains(WindowFlags::TOP_LEVEL) {
                match rec.container {
                    Some(container) if rec.flags.contains(WindowFlags::EMBEDDED) => {
                        cur = container;
                        continue;
                    }
                    _ => break,
                }
            }
            match rec.parent {
                Some(p) => cur = p,
                None => break,
            }
        }
        (x, y)
    }
}

impl Toolkit {
    /// Drain every event the connection of `display` has buffered into the
    /// queue; returns how many were queued
    pub(crate) fn check_phase(&mut self, display: DisplayId) -> Result<usize> {
        let Some(dc) = self.conns.get(display) else {
            return Ok(0);
        };
        let mut queued = 0;
        while let Some((event, serial)) = dc.conn.poll_for_event_with_sequence()? {
            let mut focus = None;
            if matches!(event, Event::KeyPress(_) | Event::KeyRelease(_)) {
                // Resolve focus first: a composed character belongs to the
                // window that had focus when the key went down.
                focus = self.registry.displays.get(display).and_then(|d| d.focus);
                if self.input_filter.filter_key(display, focus, &event) {
                    continue;
                }
            }
            self.queue.push(
                QueuePosition::Tail,
                QueuedEvent::X {
                    display,
                    event,
                    serial,
                    focus,
                },
            );
            queued += 1;
        }
        Ok(queued)
    }

    /// Check phase over all open displays
    pub fn check_all(&mut self) -> Result<usize> {
        let displays: Vec<DisplayId> = self.conns.keys().collect();
        let mut queued = 0;
        for display in displays {
            queued += self.check_phase(display)?;
        }
        Ok(queued)
    }

    /// Flush output on every display and return how long the loop may block
    pub fn setup_phase(&mut self) -> Result<Duration> {
        for dc in self.conns.values() {
            dc.conn.flush()?;
        }
        if self.queue.is_empty() && self.idle.is_empty() {
            Ok(Duration::from_millis(10))
        } else {
            Ok(Duration::ZERO)
        }
    }

    /// Round-trip to the server and queue everything it has sent so far
    pub fn sync(&mut self, display: DisplayId) -> Result<()> {
        {
            let dc = self.conn(display)?;
            dc.conn.get_input_focus()?.reply()?;
        }
        self.check_phase(display)?;
        Ok(())
    }

    /// Dispatch the event at the head of the queue, if any
    pub(crate) fn service_one(&mut self) -> Result<bool> {
        match self.queue.pop_front() {
            Some(event) => {
                self.dispatch(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn dispatch(&mut self, event: QueuedEvent) -> Result<()> {
        match event {
            QueuedEvent::X {
                display,
                event,
                serial,
                focus,
            } => self.dispatch_x(display, event, serial, focus),
            QueuedEvent::Window {
                display,
                window,
                event,
            } => self.handle_window_event(display, window, event),
            QueuedEvent::GrabCommit { display, window } => {
                let window = window.filter(|&w| self.registry.is_alive(w));
                if let Some(disp) = self.registry.displays.get_mut(display) {
                    disp.grab.grab_win = window;
                }
                log::debug!("grab window committed: {:?}", window.map(|w| self.registry.path(w)));
                Ok(())
            }
        }
    }

    fn dispatch_x(&mut self, display: DisplayId, event: Event, serial: u64, focus: Option<WindowId>) -> Result<()> {
        if let Event::Error(e) = &event {
            log::debug!("X error on display {:?}: {:?}", display, e);
            return Ok(());
        }
        let Some(xid) = event_window(&event) else {
            return Ok(());
        };
        self.tracer
            .trace_x11_event(event_name(&event), Some(xid), &format!("serial={}", serial));

        if let Event::PropertyNotify(e) = &event {
            if self.registry.displays.get(display).and_then(|d| d.comm_window) == Some(e.window) {
                return self.handle_comm_property(display, e);
            }
        }

        let Some(win) = self.registry.by_xid(display, xid) else {
            return Ok(());
        };
        let Some(rec) = self.registry.get(win) else {
            return Ok(());
        };
        let flags = rec.flags;
        if matches!(event, Event::KeyPress(_) | Event::KeyRelease(_)) {
            // Keys belong to the focus window wherever the server reported them.
            let fallback = rec.owner.filter(|_| flags.contains(WindowFlags::WRAPPER)).unwrap_or(win);
            if let Some(wev) = translate_input(&event) {
                let target = focus.filter(|&f| self.registry.is_alive(f)).unwrap_or(fallback);
                self.handle_window_event(display, target, wev)?;
            }
            return Ok(());
        }
        if flags.contains(WindowFlags::WRAPPER) {
            if let Some(top) = rec.owner {
                return self.wrapper_event(top, &event);
            }
            return Ok(());
        }

        match &event {
            Event::ConfigureNotify(e) => {
                // Toplevel geometry is reported through the wrapper.
                if !flags.contains(WindowFlags::TOP_LEVEL) && !flags.contains(WindowFlags::ANONYMOUS) {
                    self.deliver(
                        win,
                        WindowEvent::Configure {
                            x: e.x.into(),
                            y: e.y.into(),
                            width: e.width.into(),
                            height: e.height.into(),
                            border_width: e.border_width.into(),
                        },
                    );
                }
            }
            Event::MapNotify(_) => {
                if !flags.contains(WindowFlags::TOP_LEVEL) {
                    self.deliver(win, WindowEvent::Map);
                }
            }
            Event::UnmapNotify(_) => {
                if !flags.contains(WindowFlags::TOP_LEVEL) {
                    self.deliver(win, WindowEvent::Unmap);
                }
            }
            Event::DestroyNotify(_) => {
                if self.registry.is_alive(win) {
                    log::info!("{} destroyed by another client", self.registry.path(win));
                    if let Some(rec) = self.registry.get_mut(win) {
                        rec.flags |= WindowFlags::DONT_DESTROY_WINDOW;
                    }
                    self.destroy_window(win)?;
                }
            }
            Event::PropertyNotify(e) => {
                if flags.contains(WindowFlags::TOP_LEVEL) && e.atom == self.conn(display)?.atoms.net_wm_state {
                    self.net_wm_state_changed(win)?;
                }
                self.deliver(
                    win,
                    WindowEvent::Property {
                        atom: e.atom,
                        deleted: e.state == Property::DELETE,
                    },
                );
            }
            Event::Expose(e) => {
                if e.count == 0 {
                    self.deliver(win, WindowEvent::Expose);
                }
            }
            _ => {
                if let Some(wev) = translate_input(&event) {
                    self.handle_window_event(display, win, wev)?;
                }
            }
        }
        Ok(())
    }

    /// Route a logical event through grab classification to the host
    pub(crate) fn handle_window_event(&mut self, display: DisplayId, window: WindowId, mut event: WindowEvent) -> Result<()> {
        if !self.registry.is_alive(window) {
            return Ok(());
        }
        if !event.is_input() {
            self.deliver(window, event);
            return Ok(());
        }
        let classification = self.registry.classify_pointer_event(window, &mut event);
        match classification.verdict {
            PointerVerdict::Deliver => self.deliver(window, event),
            PointerVerdict::Suppress => {}
            PointerVerdict::Retarget(target) => {
                let (rx, ry) = self.registry.root_position(target);
                if let Some(p) = event.pointer_mut() {
                    p.x = p.root_x - rx;
                    p.y = p.root_y - ry;
                }
                self.queue.push(
                    QueuePosition::Head,
                    QueuedEvent::Window {
                        display,
                        window: target,
                        event,
                    },
                );
            }
        }
        if let Some(follow_up) = classification.follow_up {
            self.run_follow_up(display, follow_up)?;
        }
        Ok(())
    }

    /// Hand an event to the host; anonymous helper windows are skipped
    pub(crate) fn deliver(&mut self, window: WindowId, event: WindowEvent) {
        let Some(path) = self.registry.get(window).and_then(|r| r.path.clone()) else {
            return;
        };
        log::trace!("deliver {:?} to {}", event, path);
        self.delivered.push_back(Delivered { window, path, event });
    }

    /// Next event delivered to the host
    pub fn next_delivered(&mut self) -> Option<Delivered> {
        self.delivered.pop_front()
    }

    /// Drain all delivered events
    pub fn take_delivered(&mut self) -> Vec<Delivered> {
        self.delivered.drain(..).collect()
    }

    /// Process one queued event, server event or idle task.
    ///
    /// With `block` the call sleeps briefly when nothing was ready. Returns
    /// whether anything was processed.
    pub fn do_one_event(&mut self, block: bool) -> Result<bool> {
        if self.service_one()? {
            return Ok(true);
        }
        self.check_all()?;
        if self.service_one()? {
            return Ok(true);
        }
        if self.run_idle()? {
            return Ok(true);
        }
        let wait = self.setup_phase()?;
        if block && !wait.is_zero() {
            std::thread::sleep(wait);
        }
        Ok(false)
    }

    /// Process everything that is ready, including idle tasks
    pub fn update(&mut self) -> Result<()> {
        while self.do_one_event(false)? {}
        Ok(())
    }
}

/// Whether an X event is a crossing or focus change caused by a grab
pub fn is_grab_transition(event: &Event) -> bool {
    let mode = match event {
        Event::EnterNotify(e) | Event::LeaveNotify(e) => e.mode,
        Event::FocusIn(e) | Event::FocusOut(e) => e.mode,
        _ => return false,
    };
    mode != NotifyMode::NORMAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::registry_with_app;

    fn commit(reg_display: DisplayId) -> QueuedEvent {
        QueuedEvent::GrabCommit {
            display: reg_display,
            window: None,
        }
    }

    fn window_ev(display: DisplayId, window: WindowId, event: WindowEvent) -> QueuedEvent {
        QueuedEvent::Window {
            display,
            window,
            event,
        }
    }

    fn order(queue: &EventQueue) -> Vec<WindowEvent> {
        queue
            .iter()
            .filter_map(|e| match e {
                QueuedEvent::Window { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_queue_head_and_tail() {
        let (_reg, display, _app, main) = registry_with_app();
        let mut queue = EventQueue::new();
        queue.push(QueuePosition::Tail, window_ev(display, main, WindowEvent::Map));
        queue.push(QueuePosition::Tail, window_ev(display, main, WindowEvent::Unmap));
        queue.push(QueuePosition::Head, window_ev(display, main, WindowEvent::Expose));
        assert_eq!(
            order(&queue),
            vec![WindowEvent::Expose, WindowEvent::Map, WindowEvent::Unmap]
        );
    }

    #[test]
    fn test_queue_mark_keeps_insertion_order() {
        let (_reg, display, _app, main) = registry_with_app();
        let mut queue = EventQueue::new();
        queue.push(QueuePosition::Tail, window_ev(display, main, WindowEvent::Expose));
        // First mark insertion goes to the head, later ones follow it.
        queue.push(QueuePosition::Mark, window_ev(display, main, WindowEvent::Map));
        queue.push(QueuePosition::Mark, window_ev(display, main, WindowEvent::Unmap));
        queue.push(QueuePosition::Mark, commit(display));
        assert_eq!(
            order(&queue),
            vec![WindowEvent::Map, WindowEvent::Unmap, WindowEvent::Expose]
        );
        assert!(matches!(queue.iter().nth(2), Some(QueuedEvent::GrabCommit { .. })));
    }

    #[test]
    fn test_queue_mark_moves_back_on_removal() {
        let (_reg, display, _app, main) = registry_with_app();
        let mut queue = EventQueue::new();
        queue.push(QueuePosition::Tail, window_ev(display, main, WindowEvent::Expose));
        queue.push(QueuePosition::Mark, window_ev(display, main, WindowEvent::Map));
        // Servicing the marked head event clears the mark.
        assert!(queue.pop_front().is_some());
        queue.push(QueuePosition::Mark, window_ev(display, main, WindowEvent::Unmap));
        assert_eq!(order(&queue), vec![WindowEvent::Unmap, WindowEvent::Expose]);

        let marked = queue.push(QueuePosition::Mark, window_ev(display, main, WindowEvent::Destroy));
        queue.remove(marked);
        queue.push(QueuePosition::Mark, window_ev(display, main, WindowEvent::Map));
        assert_eq!(
            order(&queue),
            vec![WindowEvent::Unmap, WindowEvent::Map, WindowEvent::Expose]
        );
    }

    #[test]
    fn test_queue_ids_are_stable() {
        let (_reg, display, _app, main) = registry_with_app();
        let mut queue = EventQueue::new();
        let a = queue.push(QueuePosition::Tail, window_ev(display, main, WindowEvent::Map));
        let b = queue.push(QueuePosition::Tail, window_ev(display, main, WindowEvent::Unmap));
        queue.push(QueuePosition::Head, commit(display));
        assert_eq!(queue.ids().len(), 3);
        assert!(queue.remove(a).is_some());
        assert!(queue.remove(a).is_none());
        assert!(matches!(queue.get(b), Some(QueuedEvent::Window { event: WindowEvent::Unmap, .. })));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_crossing_detail_mapping() {
        assert_eq!(CrossingDetail::from_x11(NotifyDetail::NONLINEAR_VIRTUAL), CrossingDetail::NonlinearVirtual);
        assert_eq!(CrossingDetail::from_x11(NotifyDetail::INFERIOR), CrossingDetail::Inferior);
        assert_eq!(CrossingMode::from_x11(NotifyMode::WHILE_GRABBED), CrossingMode::WhileGrabbed);
    }

    #[test]
    fn test_translate_button_press() {
        let event = Event::ButtonPress(ButtonPressEvent {
            response_type: 4,
            detail: 1,
            sequence: 7,
            time: 1000,
            root: 0x100,
            event: 0x400001,
            child: 0,
            root_x: 110,
            root_y: 220,
            event_x: 10,
            event_y: 20,
            state: KeyButMask::SHIFT,
            same_screen: true,
        });
        assert_eq!(event_window(&event), Some(0x400001));
        match translate_input(&event) {
            Some(WindowEvent::ButtonPress { button, pointer }) => {
                assert_eq!(button, 1);
                assert_eq!((pointer.x, pointer.y, pointer.root_x, pointer.root_y), (10, 20, 110, 220));
                assert_eq!(pointer.state, u16::from(KeyButMask::SHIFT));
            }
            other => panic!("unexpected translation {:?}", other),
        }
    }

    #[test]
    fn test_root_position_walks_parents() {
        let (mut reg, _display, _app, main) = registry_with_app();
        let child = reg.create_child(main, "f").unwrap();
        let grandchild = reg.create_child(child, "b").unwrap();
        reg.get_mut(main).unwrap().changes.x = 100;
        reg.get_mut(main).unwrap().changes.y = 50;
        reg.get_mut(child).unwrap().changes.x = 10;
        reg.get_mut(child).unwrap().changes.y = 5;
        reg.get_mut(child).unwrap().changes.border_width = 2;
        reg.get_mut(grandchild).unwrap().changes.x = 3;
        assert_eq!(reg.root_position(grandchild), (115, 57));
    }
}
