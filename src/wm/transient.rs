//! Transient/master relationships between toplevels.

use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _, PropMode};
use x11rb::wrapper::ConnectionExt as _;

use super::WmFlags;
use crate::error::{Result, WmError};
use crate::registry::WindowId;
use crate::state::WmState;
use crate::toolkit::Toolkit;

impl Toolkit {
    /// `wm transient`: the master of `win`, if any
    pub fn transient(&self, win: WindowId) -> Result<Option<WindowId>> {
        Ok(self.wm(win)?.master)
    }

    /// `wm transient`: make `win` a transient of the toplevel containing
    /// `master`, or a plain toplevel again with `None`
    pub fn set_transient(&mut self, win: WindowId, master: Option<WindowId>) -> Result<()> {
        let wm = self.wm(win)?;
        let path = self.registry.path(win);
        if let Some(owner) = wm.icon_for {
            return Err(WmError::BadValue(format!(
                "can't make \"{}\" a transient: it is an icon for {}",
                path,
                self.registry.path(owner)
            ))
            .into());
        }
        let old = wm.master;

        let master = match master {
            None => None,
            Some(m) => {
                if !self.registry.is_alive(m) {
                    return Err(self.no_such_window(m));
                }
                let m = self.registry.toplevel_of(m).ok_or_else(|| self.no_such_window(m))?;
                if m == win {
                    return Err(WmError::SelfMaster(path).into());
                }
                let mwm = self.wm(m)?;
                if let Some(owner) = mwm.icon_for {
                    return Err(WmError::BadValue(format!(
                        "can't make \"{}\" a master: it is an icon for {}",
                        self.registry.path(m),
                        self.registry.path(owner)
                    ))
                    .into());
                }
                let mut ancestor = Some(m);
                while let Some(a) = ancestor {
                    if a == win {
                        return Err(WmError::TransientCycle {
                            master: self.registry.path(m),
                        }
                        .into());
                    }
                    ancestor = self.registry.wm(a).and_then(|w| w.master);
                }
                Some(m)
            }
        };
        if old == master {
            return Ok(());
        }

        if let Some(old) = old {
            if let Some(owm) = self.registry.wm_mut(old) {
                owm.num_transients = owm.num_transients.saturating_sub(1);
            }
        }
        if let Some(m) = master {
            self.wm_mut(m)?.num_transients += 1;
        }
        let wm = self.wm_mut(win)?;
        wm.master = master;
        if wm.flags.contains(WmFlags::NEVER_MAPPED) {
            return Ok(());
        }
        let master_unmapped = master.is_some_and(|m| !self.registry.get(m).is_some_and(|r| r.is_mapped()));
        if master_unmapped {
            self.set_wm_state(win, WmState::Withdrawn)
        } else {
            self.push_transient_for(win)
        }
    }

    /// Write or delete `WM_TRANSIENT_FOR` on the wrapper
    pub(crate) fn push_transient_for(&mut self, top: WindowId) -> Result<()> {
        let master = self.wm(top)?.master;
        let master_wrapper = match master {
            Some(m) => match self.realize_if_connected(m)? {
                Some(w) => Some(w),
                None => return Ok(()),
            },
            None => None,
        };
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        match master_wrapper {
            Some(m) => {
                dc.conn.change_property32(
                    PropMode::REPLACE,
                    wrapper,
                    AtomEnum::WM_TRANSIENT_FOR,
                    AtomEnum::WINDOW,
                    &[m],
                )?;
            }
            None => {
                dc.conn.delete_property(wrapper, AtomEnum::WM_TRANSIENT_FOR.into())?;
            }
        }
        Ok(())
    }

    /// The master of `transient` was destroyed
    pub(crate) fn master_died(&mut self, transient: WindowId) -> Result<()> {
        if !self.registry.is_alive(transient) {
            return Ok(());
        }
        if let Some((dc, wrapper)) = self.realized(transient) {
            dc.conn.delete_property(wrapper, AtomEnum::WM_TRANSIENT_FOR.into())?;
        }
        Ok(())
    }

    /// Transients follow their master in and out of view; ones the
    /// application withdrew itself stay withdrawn
    pub(crate) fn follow_master(&mut self, master: WindowId, mapped: bool) -> Result<()> {
        let Some(rec) = self.registry.get(master) else {
            return Ok(());
        };
        if rec.wm.as_deref().map_or(0, |wm| wm.num_transients) == 0 {
            return Ok(());
        }
        let transients: Vec<WindowId> = self
            .registry
            .display(rec.display)
            .toplevels
            .iter()
            .copied()
            .filter(|&t| self.registry.wm(t).is_some_and(|wm| wm.master == Some(master)))
            .collect();
        for t in transients {
            let Some(wm) = self.registry.wm(t) else {
                continue;
            };
            if mapped {
                if wm.flags.contains(WmFlags::WITHDRAWN) || !wm.withdrawn {
                    continue;
                }
                log::debug!("{} follows its master into view", self.registry.path(t));
                self.set_wm_state(t, WmState::Normal)?;
            } else {
                if wm.withdrawn {
                    continue;
                }
                self.set_wm_state(t, WmState::Withdrawn)?;
            }
        }
        Ok(())
    }
}
