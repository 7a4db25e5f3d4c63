//! Inter-application `send`.
//!
//! Every display gets one unmapped 1x1 communication window. Commands are
//! appended to the target's `Comm` property and replies to ours (see
//! [`wire`]); the `InterpRegistry` property on the root window maps
//! application names to communication windows (see [`registry`]). The
//! `TK_APPLICATION` property on a communication window lists the names it
//! answers to, so a stale registry entry can be told from a live one.
//!
//! Interpreters of this process on the same display are reached directly,
//! without a round trip through the server.

pub mod registry;
pub mod wire;

use std::collections::HashSet;
use std::ffi::CStr;

use x11rb::connection::Connection;
use x11rb::errors::ReplyError;
use x11rb::protocol::xproto::{
    AccessControl, AtomEnum, ConnectionExt as _, CreateWindowAux, EventMask, Family, Host, MapState, PropMode,
    Property, PropertyNotifyEvent, Window, WindowClass,
};
use x11rb::wrapper::ConnectionExt as _;
use x11rb::COPY_FROM_PARENT;

use self::registry::{candidate_name, NameRegistry};
use self::wire::{Record, Reply, ReplyTo};
use crate::error::{Result, SendError, XtkError};
use crate::interp::{InterpId, ScriptError, CODE_OK};
use crate::props;
use crate::registry::DisplayId;
use crate::state::StateTransition;
use crate::toolkit::Toolkit;
use crate::wait::WaitFor;
use crate::words;

/// Send bookkeeping of the process
#[derive(Debug, Default)]
pub struct SendState {
    serial: u32,
    /// Synchronous sends waiting for a reply, innermost last
    pending: Vec<PendingCommand>,
    /// Interpreters whose application is gone; their sends are refused
    retired: HashSet<InterpId>,
}

#[derive(Debug)]
struct PendingCommand {
    serial: u32,
    target: String,
    comm: Window,
    reply: Option<Reply>,
}

/// Who this process runs as, for judging server-interpreted host entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user: Option<String>,
    pub groups: Vec<String>,
}

impl LocalIdentity {
    pub fn current() -> Self {
        // SAFETY: getpwuid/getgrgid return null or a pointer to static
        // storage that stays valid until the next call; the names are
        // copied out immediately.
        unsafe {
            let pw = libc::getpwuid(libc::getuid());
            let user = (!pw.is_null()).then(|| CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned());
            let gr = libc::getgrgid(libc::getgid());
            let groups = if gr.is_null() {
                Vec::new()
            } else {
                vec![CStr::from_ptr((*gr).gr_name).to_string_lossy().into_owned()]
            };
            Self { user, groups }
        }
    }
}

/// Whether a server's access list only lets this user in: access control
/// must be on, and every entry must be a `localuser`/`localgroup` entry
/// naming us
pub fn access_list_secure(enabled: bool, hosts: &[Host], me: &LocalIdentity) -> bool {
    if !enabled {
        return false;
    }
    hosts.iter().all(|host| {
        if host.family != Family::SERVER_INTERPRETED {
            return false;
        }
        let Some(split) = host.address.iter().position(|&b| b == 0) else {
            return false;
        };
        let (kind, value) = (&host.address[..split], &host.address[split + 1..]);
        let value = String::from_utf8_lossy(value);
        match kind {
            b"localuser" => me.user.as_deref() == Some(value.as_ref()),
            b"localgroup" => me.groups.iter().any(|g| *g == value),
            _ => false,
        }
    })
}

/// Append the remote context to an error that crossed applications
fn splice(mut err: ScriptError, target: &str, script: &str) -> ScriptError {
    err.error_info = Some(format!(
        "{}\n    invoked from within\n\"send {} {}\"",
        err.trace(),
        words::quote(target),
        words::quote(script)
    ));
    err
}

impl Toolkit {
    /// Name `interp` is registered under, if any
    pub fn app_name(&self, interp: InterpId) -> Option<&str> {
        self.interps.get(interp)?.send_name.as_deref()
    }

    /// Register `interp` for send as `name`, or as `name #2`, `name #3`, ...
    /// when that is taken; an earlier registration is replaced. Returns the
    /// name actually used.
    pub fn register(&mut self, interp: InterpId, name: &str) -> Result<String> {
        let display = self.interps.get(interp).ok_or(XtkError::AppDestroyed)?.display;
        let actual = if self.is_connected(display) {
            let comm = self.comm_window(display)?;
            let mut reg = self.registry_open(display, true)?;
            if let Some(old) = &self.interps[interp].send_name {
                reg.names.delete(old);
            }
            let picked = self.pick_name(display, interp, name, comm, &mut reg.names);
            if let Ok(actual) = &picked {
                reg.names.add(actual, comm);
            }
            let closed = self.registry_close(display, reg);
            let actual = picked?;
            closed?;
            actual
        } else {
            let mut n = 1;
            loop {
                let candidate = candidate_name(name, n);
                n += 1;
                if self.local_name_taken(display, interp, &candidate).is_none() {
                    break candidate;
                }
            }
        };
        if let Some(rec) = self.interps.get_mut(interp) {
            rec.send_name = Some(actual.clone());
        }
        self.update_comm_window(display)?;
        log::info!("registered application \"{}\"", actual);
        Ok(actual)
    }

    /// `tk appname`: register under a new name and rename the main window
    /// to match
    pub fn set_app_name(&mut self, interp: InterpId, name: &str) -> Result<String> {
        let actual = self.register(interp, name)?;
        let main = self
            .interp_app(interp)
            .and_then(|app| self.registry.apps.get(app))
            .and_then(|a| a.main_window);
        if let Some(rec) = main.and_then(|m| self.registry.get_mut(m)) {
            rec.name = Some(actual.clone());
        }
        Ok(actual)
    }

    /// Another interpreter of ours on `display` using `name`
    fn local_name_taken(&self, display: DisplayId, except: InterpId, name: &str) -> Option<InterpId> {
        self.interps
            .iter()
            .find(|(id, r)| *id != except && r.display == display && r.send_name.as_deref() == Some(name))
            .map(|(id, _)| id)
    }

    /// First free candidate for `name`; stale registry entries found on
    /// the way are dropped
    fn pick_name(
        &self,
        display: DisplayId,
        interp: InterpId,
        name: &str,
        comm: Window,
        names: &mut NameRegistry,
    ) -> Result<String> {
        let mut n = 1;
        loop {
            let candidate = candidate_name(name, n);
            n += 1;
            let Some(window) = names.find(&candidate) else {
                return Ok(candidate);
            };
            let live = if window == comm {
                self.local_name_taken(display, interp, &candidate).is_some()
            } else {
                self.validate_name(display, &candidate, window, true)?
            };
            if !live {
                log::debug!("dropping stale registration of \"{}\" (0x{:x})", candidate, window);
                names.delete(&candidate);
                return Ok(candidate);
            }
        }
    }

    /// Drop the send registration of `interp`. Later sends from it fail.
    pub fn unregister(&mut self, interp: InterpId) -> Result<()> {
        let Some(rec) = self.interps.get_mut(interp) else {
            return Ok(());
        };
        self.send.retired.insert(interp);
        let Some(name) = rec.send_name.take() else {
            return Ok(());
        };
        let display = rec.display;
        log::info!("unregistering application \"{}\"", name);
        if !self.is_connected(display) {
            return Ok(());
        }
        let comm = self.registry.display(display).comm_window;
        let mut reg = self.registry_open(display, true)?;
        if comm.is_some() && reg.names.find(&name) == comm {
            reg.names.delete(&name);
        }
        self.registry_close(display, reg)?;
        self.update_comm_window(display)
    }

    pub(crate) fn forget_retired(&mut self, interp: InterpId) {
        self.send.retired.remove(&interp);
    }

    /// `winfo interps`: live registered names on `display`
    pub fn interps(&self, display: DisplayId) -> Result<Vec<String>> {
        if !self.is_connected(display) {
            return Ok(self
                .interps
                .values()
                .filter(|r| r.display == display)
                .filter_map(|r| r.send_name.clone())
                .collect());
        }
        let mut reg = self.registry_open(display, true)?;
        let pruned = self.prune(display, &mut reg.names);
        let closed = self.registry_close(display, reg);
        let names = pruned?;
        closed?;
        Ok(names)
    }

    fn prune(&self, display: DisplayId, names: &mut NameRegistry) -> Result<Vec<String>> {
        let mut live = Vec::new();
        for (window, name) in names.entries.clone() {
            if self.validate_name(display, &name, window, true)? {
                live.push(name);
            } else {
                log::debug!("pruning dead application \"{}\"", name);
                names.delete(&name);
            }
        }
        Ok(live)
    }

    /// Whether `window` is still a communication window answering to
    /// `name`. With `old_ok`, a window without the name list that still
    /// looks like a communication window counts.
    pub(crate) fn validate_name(&self, display: DisplayId, name: &str, window: Window, old_ok: bool) -> Result<bool> {
        let dc = self.conn(display)?;
        let reply = match dc
            .conn
            .get_property(false, window, dc.atoms.interp_name, AtomEnum::STRING, 0, u32::MAX / 4)?
            .reply()
        {
            Ok(r) => r,
            Err(ReplyError::X11Error(e)) => {
                log::debug!("0x{:x} is gone: {:?}", window, e.error_kind);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if reply.type_ == u32::from(AtomEnum::NONE) {
            if !old_ok {
                return Ok(false);
            }
            let attrs = dc.conn.get_window_attributes(window)?.reply();
            let geometry = dc.conn.get_geometry(window)?.reply();
            return Ok(match (attrs, geometry) {
                (Ok(a), Ok(g)) => a.map_state == MapState::UNMAPPED && g.width == 1 && g.height == 1,
                _ => false,
            });
        }
        if reply.type_ != u32::from(AtomEnum::STRING) || reply.format != 8 {
            return Ok(false);
        }
        let names = words::split_list(&String::from_utf8_lossy(&reply.value)).unwrap_or_default();
        Ok(names.iter().any(|n| n == name))
    }

    /// The communication window of `display`, created on first use
    pub(crate) fn comm_window(&mut self, display: DisplayId) -> Result<Window> {
        if let Some(w) = self.registry.display(display).comm_window {
            return Ok(w);
        }
        let root = {
            let d = self.registry.display(display);
            d.screen(d.default_screen).root
        };
        let dc = self.conn(display)?;
        let xid = dc.conn.generate_id()?;
        let aux = CreateWindowAux::new()
            .override_redirect(1)
            .event_mask(EventMask::PROPERTY_CHANGE);
        dc.conn
            .create_window(COPY_FROM_PARENT as u8, xid, root, -1, -1, 1, 1, 0, WindowClass::INPUT_ONLY, COPY_FROM_PARENT, &aux)?;
        log::debug!("communication window 0x{:x} on {}", xid, self.registry.display(display).name);
        self.registry.display_mut(display).comm_window = Some(xid);
        Ok(xid)
    }

    /// Rewrite the list of names our communication window answers to
    fn update_comm_window(&self, display: DisplayId) -> Result<()> {
        let Some(comm) = self.registry.displays.get(display).and_then(|d| d.comm_window) else {
            return Ok(());
        };
        let names = words::join(
            self.interps
                .values()
                .filter(|r| r.display == display)
                .filter_map(|r| r.send_name.as_deref()),
        );
        let dc = self.conn(display)?;
        dc.conn
            .change_property8(PropMode::REPLACE, comm, dc.atoms.interp_name, AtomEnum::STRING, names.as_bytes())?;
        Ok(())
    }

    /// Registered interpreter of this process called `name` on `display`
    fn local_interp(&self, display: DisplayId, name: &str) -> Option<InterpId> {
        self.interps
            .iter()
            .find(|(_, r)| r.display == display && r.send_name.as_deref() == Some(name))
            .map(|(id, _)| id)
    }

    /// `send`: evaluate `script` in application `target`. Asynchronous
    /// sends return an empty result without waiting.
    pub fn send(&mut self, from: InterpId, target: &str, script: &str, async_: bool) -> Result<String, ScriptError> {
        if self.send.retired.contains(&from) {
            return Err(XtkError::from(SendError::NotRegistered).into());
        }
        let display = self.interps.get(from).ok_or(XtkError::AppDestroyed)?.display;

        if let Some(local) = self.local_interp(display, target) {
            let result = self.eval(local, script);
            if async_ {
                if let Err(e) = result {
                    log::warn!("error in asynchronous send to \"{}\": {}", target, e.trace());
                }
                return Ok(String::new());
            }
            return match result {
                Err(e) if local != from => Err(splice(e, target, script)),
                other => other,
            };
        }

        if !self.is_connected(display) {
            return Err(XtkError::from(SendError::NoApplication(target.to_string())).into());
        }
        let reply = self.send_remote(display, target, script, async_)?;
        match reply {
            None => Ok(String::new()),
            Some(r) if r.code == CODE_OK => Ok(r.result),
            Some(r) => Err(splice(
                ScriptError {
                    message: r.result,
                    code: r.code,
                    error_info: r.error_info,
                    error_code: r.error_code,
                },
                target,
                script,
            )),
        }
    }

    fn send_remote(&mut self, display: DisplayId, target: &str, script: &str, async_: bool) -> Result<Option<Reply>> {
        let comm = self.comm_window(display)?;
        let reg = self.registry_open(display, false)?;
        let window = reg.names.find(target);
        self.registry_close(display, reg)?;
        let window = window.ok_or_else(|| SendError::NoApplication(target.to_string()))?;

        self.send.serial = self.send.serial.wrapping_add(1);
        let serial = self.send.serial;
        let command = wire::Command {
            name: target.to_string(),
            script: script.to_string(),
            reply_to: (!async_).then(|| ReplyTo {
                window: comm,
                serial: serial.to_string(),
            }),
        };
        log::debug!("send #{} to \"{}\" (0x{:x})", serial, target, window);
        if !self.append_comm(display, window, &command.encode())? {
            return Err(SendError::TargetDied.into());
        }
        if async_ {
            return Ok(None);
        }

        self.send.pending.push(PendingCommand {
            serial,
            target: target.to_string(),
            comm: window,
            reply: None,
        });
        let waited = self.await_reply(display, comm, serial);
        let pending = match self.send.pending.pop() {
            Some(p) if p.serial == serial => p,
            _ => panic!("send: corrupted pending-command stack"),
        };
        waited?;
        if let Some(reply) = &pending.reply {
            self.tracer.trace_transition(&StateTransition::SendCompleted {
                target: pending.target.clone(),
                code: reply.code,
            });
        }
        Ok(pending.reply)
    }

    /// Pump send traffic until the reply to `serial` arrives, checking that
    /// the target is still there whenever it stays silent for a while
    fn await_reply(&mut self, display: DisplayId, comm: Window, serial: u32) -> Result<()> {
        let wait = WaitFor::SendReply {
            comm,
            atom: self.conn(display)?.atoms.comm,
        };
        let timeout = self.config.send.timeout();
        let answered = |tk: &Toolkit| {
            tk.send
                .pending
                .iter()
                .any(|p| p.serial == serial && p.reply.is_some())
        };
        loop {
            if self.pump(display, &wait, timeout, answered)? {
                return Ok(());
            }
            let Some(p) = self.send.pending.iter().find(|p| p.serial == serial) else {
                return Ok(());
            };
            let (target, window) = (p.target.clone(), p.comm);
            if self.validate_name(display, &target, window, false)? {
                log::debug!("\"{}\" is slow but alive; still waiting for #{}", target, serial);
                continue;
            }
            log::warn!("\"{}\" stopped answering", target);
            return Err(if self.validate_name(display, &target, window, true)? {
                SendError::TargetDiedOrOld
            } else {
                SendError::TargetDied
            }
            .into());
        }
    }

    /// Append to another window's `Comm` property; false if the window is gone
    fn append_comm(&self, display: DisplayId, window: Window, bytes: &[u8]) -> Result<bool> {
        let dc = self.conn(display)?;
        let cookie = dc
            .conn
            .change_property8(PropMode::APPEND, window, dc.atoms.comm, AtomEnum::STRING, bytes)?;
        match cookie.check() {
            Ok(()) => Ok(true),
            Err(ReplyError::X11Error(e)) => {
                log::debug!("appending to 0x{:x} failed: {:?}", window, e.error_kind);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether inbound commands may run on `display`
    pub fn server_secure(&self, display: DisplayId) -> Result<bool> {
        if self.config.send.allow_insecure {
            return Ok(true);
        }
        let dc = self.conn(display)?;
        let reply = dc.conn.list_hosts()?.reply()?;
        Ok(access_list_secure(
            reply.mode == AccessControl::ENABLE,
            &reply.hosts,
            &LocalIdentity::current(),
        ))
    }

    /// Property traffic on our communication window
    pub(crate) fn handle_comm_property(&mut self, display: DisplayId, event: &PropertyNotifyEvent) -> Result<()> {
        let dc = self.conn(display)?;
        if event.atom != dc.atoms.comm || event.state != Property::NEW_VALUE {
            return Ok(());
        }
        let Some(bytes) = props::get_bytes(&dc.conn, event.window, dc.atoms.comm, true)? else {
            return Ok(());
        };
        for record in wire::decode(&bytes) {
            match record {
                Record::Command(command) => self.run_inbound(display, command)?,
                Record::Reply(reply) => self.accept_reply(reply),
            }
        }
        Ok(())
    }

    fn accept_reply(&mut self, reply: Reply) {
        match self
            .send
            .pending
            .iter_mut()
            .find(|p| p.serial == reply.serial && p.reply.is_none())
        {
            Some(p) => {
                log::debug!("reply to #{} from \"{}\" (code {})", reply.serial, p.target, reply.code);
                p.reply = Some(reply);
            }
            None => log::debug!("stray send reply #{}", reply.serial),
        }
    }

    fn run_inbound(&mut self, display: DisplayId, command: wire::Command) -> Result<()> {
        let outcome = if !self.server_secure(display)? {
            log::warn!("refusing command for \"{}\": X server insecure", command.name);
            Err(ScriptError::from(XtkError::from(SendError::Insecure)))
        } else {
            match self.local_interp(display, &command.name) {
                Some(interp) => {
                    log::debug!("running sent command in \"{}\"", command.name);
                    self.eval(interp, &command.script)
                }
                None => Err(ScriptError::new(format!(
                    "receiver never heard of interpreter \"{}\"",
                    command.name
                ))),
            }
        };

        let Some(to) = command.reply_to else {
            if let Err(e) = outcome {
                log::warn!("error in command sent to \"{}\": {}", command.name, e.trace());
            }
            return Ok(());
        };
        let Ok(serial) = to.serial.trim().parse() else {
            log::debug!("unusable reply serial {:?}", to.serial);
            return Ok(());
        };
        let reply = match outcome {
            Ok(result) => Reply {
                serial,
                code: CODE_OK,
                result,
                error_info: None,
                error_code: None,
            },
            Err(e) => Reply {
                serial,
                code: e.code,
                error_info: Some(e.trace().to_string()),
                result: e.message,
                error_code: e.error_code,
            },
        };
        if !self.append_comm(display, to.window, &reply.encode())? {
            log::debug!("sender of command for \"{}\" went away", command.name);
        }
        self.conn(display)?.conn.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{Interp, CODE_ERROR};
    use crate::toolkit::tests::detached;
    use std::rc::Rc;

    /// Answers every script with itself; `fail ...` raises an error
    struct Echo;

    impl Interp for Echo {
        fn eval(&self, _tk: &mut Toolkit, script: &str) -> Result<String, ScriptError> {
            match script.strip_prefix("fail ") {
                Some(msg) => {
                    let mut err = ScriptError::new(msg).with_code("ECHO FAIL");
                    err.error_info = Some(format!("{}\n    while executing\n\"{}\"", msg, script));
                    Err(err)
                }
                None => Ok(script.to_string()),
            }
        }
    }

    fn echo_interp(tk: &mut Toolkit, app: crate::registry::AppId) -> InterpId {
        tk.add_interp(app, Rc::new(Echo))
    }

    #[test]
    fn test_colliding_names_get_suffixes() {
        let (mut tk, display, app, main) = detached();
        let a = echo_interp(&mut tk, app);
        let (app2, _) = tk.create_app(display, "Demo").unwrap();
        let b = echo_interp(&mut tk, app2);
        let (app3, _) = tk.create_app(display, "Demo").unwrap();
        let c = echo_interp(&mut tk, app3);

        assert_eq!(tk.register(a, "app").unwrap(), "app");
        assert_eq!(tk.register(b, "app").unwrap(), "app #2");
        assert_eq!(tk.register(c, "app").unwrap(), "app #3");
        for (interp, name) in [(a, "app"), (b, "app #2"), (c, "app #3")] {
            assert_eq!(tk.local_interp(display, name), Some(interp));
        }
        assert_eq!(tk.interps(display).unwrap().len(), 3);
        assert!(tk.registry.is_alive(main));
    }

    #[test]
    fn test_reregistering_frees_old_name() {
        let (mut tk, display, app, _) = detached();
        let a = echo_interp(&mut tk, app);
        tk.register(a, "first").unwrap();
        assert_eq!(tk.register(a, "second").unwrap(), "second");
        assert_eq!(tk.app_name(a), Some("second"));
        assert_eq!(tk.local_interp(display, "first"), None);
        // its own current name is not a collision
        assert_eq!(tk.register(a, "second").unwrap(), "second");
    }

    #[test]
    fn test_local_send_matches_direct_eval() {
        let (mut tk, display, app, _) = detached();
        let a = echo_interp(&mut tk, app);
        let (app2, _) = tk.create_app(display, "Demo").unwrap();
        let b = echo_interp(&mut tk, app2);
        tk.register(b, "target").unwrap();

        let direct = tk.eval(b, "winfo name .").unwrap();
        assert_eq!(tk.send(a, "target", "winfo name .", false).unwrap(), direct);
        assert_eq!(tk.send(a, "target", "winfo name .", true).unwrap(), "");
    }

    #[test]
    fn test_local_send_carries_error_state() {
        let (mut tk, display, app, _) = detached();
        let a = echo_interp(&mut tk, app);
        let (app2, _) = tk.create_app(display, "Demo").unwrap();
        let b = echo_interp(&mut tk, app2);
        tk.register(b, "target").unwrap();

        let direct = tk.eval(b, "fail boom").unwrap_err();
        let err = tk.send(a, "target", "fail boom", false).unwrap_err();
        assert_eq!(err.message, "boom");
        assert_eq!(err.code, CODE_ERROR);
        assert_eq!(err.error_code, direct.error_code);
        let info = err.error_info.unwrap();
        assert!(info.starts_with(direct.trace()));
        assert!(info.ends_with("invoked from within\n\"send target {fail boom}\""));

        // a send to itself is a plain evaluation
        tk.register(a, "self").unwrap();
        assert_eq!(tk.send(a, "self", "fail boom", false).unwrap_err(), direct);
    }

    #[test]
    fn test_unknown_target() {
        let (mut tk, _, app, _) = detached();
        let a = echo_interp(&mut tk, app);
        let err = tk.send(a, "nobody", "x", false).unwrap_err();
        assert_eq!(err.message, "no application named \"nobody\"");
        assert_eq!(err.error_code.as_deref(), Some("TK SEND"));
    }

    #[test]
    fn test_application_teardown_retires_send() {
        let (mut tk, display, app, main) = detached();
        let a = echo_interp(&mut tk, app);
        tk.register(a, "doomed").unwrap();
        tk.destroy_window(main).unwrap();
        assert_eq!(tk.app_name(a), None);
        assert_eq!(tk.local_interp(display, "doomed"), None);
        let err = tk.send(a, "doomed", "x", false).unwrap_err();
        assert_eq!(err.message, "send is not available: application is not registered");
    }

    #[test]
    fn test_replies_match_pending_serials() {
        let (mut tk, _, _, _) = detached();
        tk.send.pending.push(PendingCommand {
            serial: 7,
            target: "a".into(),
            comm: 0x400001,
            reply: None,
        });
        let reply = |serial, result: &str| Reply {
            serial,
            code: CODE_OK,
            result: result.into(),
            error_info: None,
            error_code: None,
        };
        tk.accept_reply(reply(8, "stray"));
        assert!(tk.send.pending[0].reply.is_none());
        tk.accept_reply(reply(7, "first"));
        tk.accept_reply(reply(7, "duplicate"));
        assert_eq!(tk.send.pending[0].reply.as_ref().map(|r| r.result.as_str()), Some("first"));
    }

    fn host(family: Family, address: &[u8]) -> Host {
        Host {
            family,
            address: address.to_vec(),
        }
    }

    #[test]
    fn test_access_list_security() {
        let me = LocalIdentity {
            user: Some("alice".into()),
            groups: vec!["staff".into()],
        };
        assert!(access_list_secure(true, &[], &me));
        assert!(!access_list_secure(false, &[], &me));
        assert!(access_list_secure(
            true,
            &[host(Family::SERVER_INTERPRETED, b"localuser\0alice")],
            &me
        ));
        assert!(access_list_secure(
            true,
            &[host(Family::SERVER_INTERPRETED, b"localgroup\0staff")],
            &me
        ));
        assert!(!access_list_secure(
            true,
            &[host(Family::SERVER_INTERPRETED, b"localuser\0mallory")],
            &me
        ));
        assert!(!access_list_secure(true, &[host(Family::INTERNET, &[127, 0, 0, 1])], &me));
    }
}
