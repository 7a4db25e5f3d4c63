//! Restricted event pumps.
//!
//! A blocking wait (grab echo eating, configure/map confirmation, send
//! replies) is a [`WaitFor`] predicate driven by [`Toolkit::pump`]: the pump
//! keeps reading server events into the queue and asks the predicate what to
//! do with each queued event. Deferred events stay where they are, in order,
//! for the main loop to handle later.

use std::time::{Duration, Instant};

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, Window};
use x11rb::protocol::Event;

use crate::error::{Result, XtkError};
use crate::event::{is_grab_transition, QueuedEvent};
use crate::registry::DisplayId;
use crate::toolkit::Toolkit;

/// What a restricted pump is waiting for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitFor {
    /// Crossing/focus echoes of grab requests issued at or after `serial`
    GrabEvents { serial: u64 },
    /// A ConfigureNotify on the wrapper caused by a request at or after `serial`
    Configure {
        wrapper: Window,
        reparent: Option<Window>,
        serial: u64,
    },
    /// Map or unmap of the wrapper
    Map {
        wrapper: Window,
        reparent: Option<Window>,
        mapped: bool,
    },
    /// Property traffic on our communication window
    SendReply { comm: Window, atom: Atom },
}

/// Per-event decision of a restricted pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Leave it queued for later
    Defer,
    /// Drop it unprocessed
    Discard,
    /// Process it now
    Process,
    /// Process it now; the wait is over
    Found,
}

impl WaitFor {
    pub fn verdict(&self, display: DisplayId, queued: &QueuedEvent) -> Verdict {
        let QueuedEvent::X {
            display: d,
            event,
            serial,
            ..
        } = queued
        else {
            return Verdict::Defer;
        };
        if *d != display {
            return Verdict::Defer;
        }
        match self {
            WaitFor::GrabEvents { serial: after } => {
                if is_grab_transition(event) && serial >= after {
                    Verdict::Discard
                } else {
                    Verdict::Defer
                }
            }
            WaitFor::Configure {
                wrapper,
                reparent,
                serial: after,
            } => match structure_event(event, *wrapper, *reparent) {
                Some(Structure::Reparent) => Verdict::Process,
                Some(Structure::Configure) if serial >= after => Verdict::Found,
                Some(Structure::Configure | Structure::Map | Structure::Unmap) => Verdict::Process,
                None => Verdict::Defer,
            },
            WaitFor::Map {
                wrapper,
                reparent,
                mapped,
            } => match structure_event(event, *wrapper, *reparent) {
                Some(Structure::Reparent) => Verdict::Process,
                Some(Structure::Map) if *mapped => Verdict::Found,
                Some(Structure::Unmap) if !*mapped => Verdict::Found,
                Some(_) => Verdict::Process,
                None => Verdict::Defer,
            },
            WaitFor::SendReply { comm, atom } => match event {
                Event::PropertyNotify(e) if e.window == *comm && e.atom == *atom => Verdict::Process,
                _ => Verdict::Defer,
            },
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            WaitFor::GrabEvents { .. } => "grab events",
            WaitFor::Configure { .. } => "ConfigureNotify",
            WaitFor::Map { mapped: true, .. } => "MapNotify",
            WaitFor::Map { mapped: false, .. } => "UnmapNotify",
            WaitFor::SendReply { .. } => "send reply",
        }
    }
}

enum Structure {
    Configure,
    Map,
    Unmap,
    Reparent,
}

/// Structural events the geometry waits care about; reparents count
/// anywhere, the rest only on the wrapper or its frame
fn structure_event(event: &Event, wrapper: Window, reparent: Option<Window>) -> Option<Structure> {
    let (window, kind) = match event {
        Event::ReparentNotify(_) => return Some(Structure::Reparent),
        Event::ConfigureNotify(e) => (e.window, Structure::Configure),
        Event::MapNotify(e) => (e.window, Structure::Map),
        Event::UnmapNotify(e) => (e.window, Structure::Unmap),
        _ => return None,
    };
    if window == wrapper || Some(window) == reparent {
        Some(kind)
    } else {
        None
    }
}

impl Toolkit {
    /// Run a restricted pump on `display`.
    ///
    /// Returns `Ok(true)` once the predicate reports `Found` or `done` holds,
    /// `Ok(false)` if `timeout` passes without any processed event. Every
    /// processed event re-arms the timeout. A zero timeout makes a single
    /// pass over what is already queued.
    pub fn pump(
        &mut self,
        display: DisplayId,
        wait: &WaitFor,
        timeout: Duration,
        done: impl Fn(&Toolkit) -> bool,
    ) -> Result<bool> {
        let mut deadline = Instant::now() + timeout;
        loop {
            if self.cancel.get() {
                return Err(XtkError::Canceled);
            }
            if done(self) {
                return Ok(true);
            }
            self.check_phase(display)?;

            let mut progressed = false;
            for id in self.queue.ids() {
                let Some(queued) = self.queue.get(id) else {
                    continue;
                };
                let verdict = wait.verdict(display, queued);
                match verdict {
                    Verdict::Defer => continue,
                    Verdict::Discard => {
                        self.queue.remove(id);
                    }
                    Verdict::Process | Verdict::Found => {
                        let found = verdict == Verdict::Found;
                        if let Some(event) = self.queue.remove(id) {
                            self.dispatch(event)?;
                        }
                        if found || done(self) {
                            return Ok(true);
                        }
                        progressed = true;
                    }
                }
            }

            if progressed {
                deadline = Instant::now() + timeout;
            }
            if timeout.is_zero() {
                return Ok(done(self));
            }
            if Instant::now() >= deadline {
                log::debug!("gave up waiting for {} after {:?}", wait.describe(), timeout);
                return Ok(done(self));
            }
            if let Some(dc) = self.conns.get(display) {
                dc.conn.flush()?;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::registry_with_app;
    use x11rb::protocol::xproto::{
        ConfigureNotifyEvent, EnterNotifyEvent, KeyButMask, MapNotifyEvent, NotifyDetail, NotifyMode,
        PropertyNotifyEvent, Property, ReparentNotifyEvent,
    };

    fn x(display: DisplayId, event: Event, serial: u64) -> QueuedEvent {
        QueuedEvent::X {
            display,
            event,
            serial,
            focus: None,
        }
    }

    fn configure(window: Window) -> Event {
        Event::ConfigureNotify(ConfigureNotifyEvent {
            response_type: 22,
            sequence: 0,
            event: window,
            window,
            above_sibling: 0,
            x: 0,
            y: 0,
            width: 100,
            height: 100,
            border_width: 0,
            override_redirect: false,
        })
    }

    fn map(window: Window) -> Event {
        Event::MapNotify(MapNotifyEvent {
            response_type: 19,
            sequence: 0,
            event: window,
            window,
            override_redirect: false,
        })
    }

    fn enter(mode: NotifyMode) -> Event {
        Event::EnterNotify(EnterNotifyEvent {
            response_type: 7,
            detail: NotifyDetail::ANCESTOR,
            sequence: 0,
            time: 0,
            root: 0x100,
            event: 0x400001,
            child: 0,
            root_x: 0,
            root_y: 0,
            event_x: 0,
            event_y: 0,
            state: KeyButMask::default(),
            mode,
            same_screen_focus: 0,
        })
    }

    #[test]
    fn test_grab_events_discards_only_new_transitions() {
        let (_reg, display, _, _) = registry_with_app();
        let wait = WaitFor::GrabEvents { serial: 10 };
        assert_eq!(wait.verdict(display, &x(display, enter(NotifyMode::GRAB), 12)), Verdict::Discard);
        assert_eq!(wait.verdict(display, &x(display, enter(NotifyMode::GRAB), 9)), Verdict::Defer);
        assert_eq!(wait.verdict(display, &x(display, enter(NotifyMode::NORMAL), 12)), Verdict::Defer);
        assert_eq!(wait.verdict(display, &x(display, configure(1), 12)), Verdict::Defer);
    }

    #[test]
    fn test_configure_wait_verdicts() {
        let (_reg, display, _, _) = registry_with_app();
        let wait = WaitFor::Configure {
            wrapper: 0x500001,
            reparent: Some(0x200005),
            serial: 40,
        };
        assert_eq!(wait.verdict(display, &x(display, configure(0x500001), 41)), Verdict::Found);
        assert_eq!(wait.verdict(display, &x(display, configure(0x500001), 39)), Verdict::Process);
        assert_eq!(wait.verdict(display, &x(display, configure(0x200005), 41)), Verdict::Found);
        assert_eq!(wait.verdict(display, &x(display, map(0x500001), 41)), Verdict::Process);
        assert_eq!(wait.verdict(display, &x(display, configure(0x777), 41)), Verdict::Defer);
        let reparent = Event::ReparentNotify(ReparentNotifyEvent {
            response_type: 21,
            sequence: 0,
            event: 0x999,
            window: 0x999,
            parent: 0x100,
            x: 0,
            y: 0,
            override_redirect: false,
        });
        assert_eq!(wait.verdict(display, &x(display, reparent, 1)), Verdict::Process);
    }

    #[test]
    fn test_map_wait_and_other_events() {
        let (_reg, display, _, main) = registry_with_app();
        let wait = WaitFor::Map {
            wrapper: 0x500001,
            reparent: None,
            mapped: true,
        };
        assert_eq!(wait.verdict(display, &x(display, map(0x500001), 5)), Verdict::Found);
        assert_eq!(wait.verdict(display, &x(display, configure(0x500001), 5)), Verdict::Process);
        let synthetic = QueuedEvent::GrabCommit { display, window: Some(main) };
        assert_eq!(wait.verdict(display, &synthetic), Verdict::Defer);
    }

    #[test]
    fn test_send_reply_only_takes_comm_property() {
        let (_reg, display, _, _) = registry_with_app();
        let wait = WaitFor::SendReply { comm: 0x600001, atom: 77 };
        let prop = |window, atom| {
            Event::PropertyNotify(PropertyNotifyEvent {
                response_type: 28,
                sequence: 0,
                window,
                atom,
                time: 0,
                state: Property::NEW_VALUE,
            })
        };
        assert_eq!(wait.verdict(display, &x(display, prop(0x600001, 77), 1)), Verdict::Process);
        assert_eq!(wait.verdict(display, &x(display, prop(0x600001, 78), 1)), Verdict::Defer);
        assert_eq!(wait.verdict(display, &x(display, prop(0x600002, 77), 1)), Verdict::Defer);
    }
}
