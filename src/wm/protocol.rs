//! `WM_PROTOCOLS` handlers.

use x11rb::protocol::xproto::{Atom, AtomEnum, ClientMessageEvent, ConnectionExt as _, PropMode};
use x11rb::wrapper::ConnectionExt as _;

use super::{ProtocolHandler, WmFlags, WmInfo};
use crate::error::Result;
use crate::ewmh::Atoms;
use crate::props;
use crate::registry::WindowId;
use crate::toolkit::Toolkit;

const DELETE_WINDOW: &str = "WM_DELETE_WINDOW";
const PING: &str = "_NET_WM_PING";

/// What to do with an incoming protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolAction {
    /// Answer a liveness check
    Ping,
    /// Evaluate the registered command
    Run(String),
    /// Destroy the toplevel
    Destroy,
    Ignore,
}

impl WmInfo {
    /// Decide how to answer protocol `name`
    pub fn protocol_action(&self, name: &str) -> ProtocolAction {
        if name == PING {
            return ProtocolAction::Ping;
        }
        if let Some(handler) = self.protocols.iter().find(|p| p.name == name) {
            return ProtocolAction::Run(handler.command.clone());
        }
        if name == DELETE_WINDOW {
            ProtocolAction::Destroy
        } else {
            ProtocolAction::Ignore
        }
    }

    /// Protocol names to advertise: the built-in ones first, then every
    /// protocol with a handler
    pub fn protocol_list(&self) -> Vec<String> {
        let mut names = vec![DELETE_WINDOW.to_string(), PING.to_string()];
        for p in &self.protocols {
            if !names.contains(&p.name) {
                names.push(p.name.clone());
            }
        }
        names
    }

    /// Register, replace or (with `None` or an empty command) remove the
    /// handler for `name`; returns whether anything changed
    pub fn set_protocol(&mut self, name: &str, command: Option<&str>) -> bool {
        let existing = self.protocols.iter().position(|p| p.name == name);
        match (command.filter(|c| !c.is_empty()), existing) {
            (None, None) => false,
            (None, Some(i)) => {
                self.protocols.remove(i);
                true
            }
            (Some(command), Some(i)) => {
                self.protocols[i].command = command.to_string();
                true
            }
            (Some(command), None) => {
                self.protocols.insert(
                    0,
                    ProtocolHandler {
                        name: name.to_string(),
                        command: command.to_string(),
                    },
                );
                true
            }
        }
    }
}

impl Toolkit {
    /// `wm protocol`: names with a registered handler
    pub fn protocols(&self, win: WindowId) -> Result<Vec<String>> {
        Ok(self.wm(win)?.protocols.iter().map(|p| p.name.clone()).collect())
    }

    /// `wm protocol`: the handler registered for `name`
    pub fn protocol_command(&self, win: WindowId, name: &str) -> Result<Option<String>> {
        Ok(self
            .wm(win)?
            .protocols
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.command.clone()))
    }

    /// `wm protocol`: register or remove a handler
    pub fn set_protocol(&mut self, win: WindowId, name: &str, command: Option<&str>) -> Result<()> {
        let wm = self.wm_mut(win)?;
        if !wm.set_protocol(name, command) || wm.flags.contains(WmFlags::NEVER_MAPPED) {
            return Ok(());
        }
        self.push_protocols(win)
    }

    /// Write `WM_PROTOCOLS` on the wrapper
    pub(crate) fn push_protocols(&mut self, top: WindowId) -> Result<()> {
        let names = self.wm(top)?.protocol_list();
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        let mut atoms: Vec<Atom> = Vec::with_capacity(names.len());
        for name in &names {
            atoms.push(match name.as_str() {
                DELETE_WINDOW => dc.atoms.wm_delete_window,
                PING => dc.atoms.net_wm_ping,
                other => Atoms::intern(&dc.conn, other.as_bytes())?,
            });
        }
        dc.conn
            .change_property32(PropMode::REPLACE, wrapper, dc.atoms.wm_protocols, AtomEnum::ATOM, &atoms)?;
        Ok(())
    }

    /// A `WM_PROTOCOLS` client message arrived on the wrapper of `top`
    pub(crate) fn protocol_message(&mut self, top: WindowId, event: &ClientMessageEvent) -> Result<()> {
        let rec = &self.registry.windows[top];
        let (display, screen) = (rec.display, rec.screen);
        let protocol = event.data.as_data32()[0];
        let dc = self.conn(display)?;
        let name = if protocol == dc.atoms.net_wm_ping {
            PING.to_string()
        } else if protocol == dc.atoms.wm_delete_window {
            DELETE_WINDOW.to_string()
        } else {
            props::atom_name(&dc.conn, protocol)?
        };
        log::debug!("{} protocol for {}", name, self.registry.path(top));

        match self.wm(top)?.protocol_action(&name) {
            ProtocolAction::Ping => {
                let root = self.registry.display(display).screen(screen).root;
                let dc = self.conn(display)?;
                let mut reply = *event;
                reply.window = root;
                dc.conn.send_event(false, root, props::wm_request_mask(), reply)?;
            }
            ProtocolAction::Run(command) => {
                let Some(interp) = app_interp(self, top) else {
                    log::warn!("no interpreter to run \"{}\" handler of {}", name, self.registry.path(top));
                    return Ok(());
                };
                if let Err(e) = self.eval(interp, &command) {
                    log::warn!(
                        "{}\n    (command for \"{}\" window manager protocol)",
                        e.trace(),
                        name
                    );
                }
            }
            ProtocolAction::Destroy => {
                log::info!("window manager asked to delete {}", self.registry.path(top));
                self.destroy_window(top)?;
            }
            ProtocolAction::Ignore => {}
        }
        Ok(())
    }
}

fn app_interp(tk: &Toolkit, top: WindowId) -> Option<crate::interp::InterpId> {
    let app = tk.registry.get(top)?.app?;
    tk.registry.apps.get(app)?.interp
}
