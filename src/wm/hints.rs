//! ICCCM and EWMH properties of toplevels.
//!
//! Everything here is written on the wrapper window, which is the window
//! the window manager sees. Setters update [`WmInfo`] first and push the
//! property only once the wrapper exists; the first map pushes the rest.

use x11rb::properties::{AspectRatio, WmHints, WmHintsState, WmSizeHints, WmSizeHintsSpecification};
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt, PropMode, Window};
use x11rb::wrapper::ConnectionExt as _;

use crate::error::{Result, WmError};
use crate::props;
use crate::registry::WindowId;
use crate::state::WmState;
use crate::toolkit::{DisplayConn, Toolkit};

use super::{SizeHintFlags, WmInfo};

/// One ARGB image of an icon photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    pub width: u32,
    pub height: u32,
    /// Row-major `0xAARRGGBB` pixels
    pub pixels: Vec<u32>,
}

/// Pack images into `_NET_WM_ICON` data: width, height, then pixels, per image
pub fn pack_icon(images: &[IconImage]) -> Vec<u32> {
    let mut data = Vec::new();
    for image in images {
        let count = (image.width as usize).saturating_mul(image.height as usize);
        data.push(image.width);
        data.push(image.height);
        data.extend(image.pixels.iter().copied().chain(std::iter::repeat(0)).take(count));
    }
    data
}

/// Split `_NET_WM_ICON` data back into images, stopping at the first
/// truncated entry
pub fn unpack_icon(data: &[u32]) -> Vec<IconImage> {
    let mut images = Vec::new();
    let mut idx = 0;
    while idx + 2 <= data.len() {
        let width = data[idx];
        let height = data[idx + 1];
        let count = (width as usize).saturating_mul(height as usize);
        if width == 0 || height == 0 || idx + 2 + count > data.len() {
            break;
        }
        images.push(IconImage {
            width,
            height,
            pixels: data[idx + 2..idx + 2 + count].to_vec(),
        });
        idx += 2 + count;
    }
    images
}

/// `WM_CLASS` value: instance and class, each NUL-terminated
pub fn class_hint(instance: &str, class: &str) -> Vec<u8> {
    let mut value = Vec::with_capacity(instance.len() + class.len() + 2);
    value.extend_from_slice(instance.as_bytes());
    value.push(0);
    value.extend_from_slice(class.as_bytes());
    value.push(0);
    value
}

/// `WM_COMMAND` value: arguments, each NUL-terminated
pub fn command_hint(argv: &[String]) -> Vec<u8> {
    let mut value = Vec::new();
    for arg in argv {
        value.extend_from_slice(arg.as_bytes());
        value.push(0);
    }
    value
}

impl WmInfo {
    /// `WM_NORMAL_HINTS` for a content size of `width`x`height`
    pub fn normal_hints(&self, req_width: i32, req_height: i32, width: i32, height: i32) -> WmSizeHints {
        let sh = self.size_hints(req_width, req_height, width, height);
        let mut hints = WmSizeHints::new();
        if sh.flags.contains(SizeHintFlags::US_POSITION) {
            hints.position = Some((WmSizeHintsSpecification::UserSpecified, self.x, self.y));
        } else if sh.flags.contains(SizeHintFlags::P_POSITION) {
            hints.position = Some((WmSizeHintsSpecification::ProgramSpecified, self.x, self.y));
        }
        let full_height = height + self.menu_height;
        if sh.flags.contains(SizeHintFlags::US_SIZE) {
            hints.size = Some((WmSizeHintsSpecification::UserSpecified, width, full_height));
        } else if sh.flags.contains(SizeHintFlags::P_SIZE) {
            hints.size = Some((WmSizeHintsSpecification::ProgramSpecified, width, full_height));
        }
        hints.min_size = Some(sh.min);
        if sh.flags.contains(SizeHintFlags::P_MAX_SIZE) {
            hints.max_size = Some(sh.max);
        }
        if sh.flags.contains(SizeHintFlags::P_RESIZE_INC) {
            hints.size_increment = Some(sh.inc);
        }
        if sh.flags.contains(SizeHintFlags::P_BASE_SIZE) {
            hints.base_size = Some(sh.base);
        }
        if sh.flags.contains(SizeHintFlags::P_ASPECT) {
            hints.aspect = Some((
                AspectRatio::new(sh.min_aspect.0, sh.min_aspect.1),
                AspectRatio::new(sh.max_aspect.0, sh.max_aspect.1),
            ));
        }
        if sh.flags.contains(SizeHintFlags::P_WIN_GRAVITY) {
            hints.win_gravity = Some(sh.gravity.to_x11());
        }
        hints
    }
}

impl Toolkit {
    /// Connection and wrapper id of a toplevel whose wrapper exists
    pub(crate) fn realized(&self, top: WindowId) -> Option<(&DisplayConn, Window)> {
        let wrapper = self.wrapper_xid(top)?;
        let display = self.registry.get(top)?.display;
        Some((self.conns.get(display)?, wrapper))
    }

    /// Realize a toplevel and its wrapper when a server is available
    pub(crate) fn realize_if_connected(&mut self, top: WindowId) -> Result<Option<Window>> {
        let Some(display) = self.registry.get(top).map(|r| r.display) else {
            return Ok(None);
        };
        if !self.is_connected(display) {
            return Ok(None);
        }
        self.make_exist(top)?;
        Ok(self.wrapper_xid(top))
    }

    /// Write `WM_HINTS`
    pub(crate) fn update_hints(&mut self, top: WindowId) -> Result<()> {
        if !self.registry.is_alive(top) {
            return Ok(());
        }
        let Some(wm) = self.registry.wm(top) else {
            return Ok(());
        };
        let mut hints = WmHints::new();
        hints.input = Some(wm.hints.input);
        hints.initial_state = match wm.hints.initial_state {
            WmState::Normal => Some(WmHintsState::Normal),
            WmState::Iconic => Some(WmHintsState::Iconic),
            WmState::Withdrawn => None,
        };
        hints.icon_pixmap = wm.hints.icon_pixmap;
        hints.icon_mask = wm.hints.icon_mask;
        hints.icon_position = wm.hints.icon_position;
        hints.icon_window = wm.icon.and_then(|icon| self.wrapper_xid(icon));
        hints.window_group = wm.group.and_then(|g| self.wrapper_xid(g));
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        hints.set(&dc.conn, wrapper)?;
        Ok(())
    }

    /// Write `WM_NORMAL_HINTS` for a content size of `width`x`height`
    pub(crate) fn write_size_hints(&mut self, top: WindowId, width: i32, height: i32) -> Result<()> {
        let Some(rec) = self.registry.get(top) else {
            return Ok(());
        };
        let Some(wm) = rec.wm.as_deref() else {
            return Ok(());
        };
        let hints = wm.normal_hints(rec.req_width, rec.req_height, width, height);
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        hints.set_normal_hints(&dc.conn, wrapper)?;
        log::debug!("size hints for {}: {:?}", self.registry.path(top), hints);
        Ok(())
    }

    /// Title, falling back to the window name
    pub fn title(&self, win: WindowId) -> Result<String> {
        let wm = self.wm(win)?;
        Ok(wm
            .title
            .clone()
            .or_else(|| self.registry.windows[win].name.clone())
            .unwrap_or_default())
    }

    /// `wm title`
    pub fn set_title(&mut self, win: WindowId, title: &str) -> Result<()> {
        self.wm_mut(win)?.title = Some(title.to_string());
        self.push_title(win)
    }

    pub(crate) fn push_title(&mut self, top: WindowId) -> Result<()> {
        let title = self.title(top)?;
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        props::set_string(&dc.conn, wrapper, AtomEnum::WM_NAME, &title)?;
        props::set_utf8(&dc.conn, wrapper, dc.atoms.net_wm_name, dc.atoms.utf8_string, &title)?;
        Ok(())
    }

    /// `wm iconname`; an empty name removes it
    pub fn set_icon_name(&mut self, win: WindowId, name: &str) -> Result<()> {
        self.wm_mut(win)?.icon_name = (!name.is_empty()).then(|| name.to_string());
        self.push_icon_name(win)
    }

    pub(crate) fn push_icon_name(&mut self, top: WindowId) -> Result<()> {
        let name = self.wm(top)?.icon_name.clone();
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        match name {
            Some(name) => {
                props::set_string(&dc.conn, wrapper, AtomEnum::WM_ICON_NAME, &name)?;
                props::set_utf8(&dc.conn, wrapper, dc.atoms.net_wm_icon_name, dc.atoms.utf8_string, &name)?;
            }
            None => {
                dc.conn.delete_property(wrapper, AtomEnum::WM_ICON_NAME.into())?;
                dc.conn.delete_property(wrapper, dc.atoms.net_wm_icon_name)?;
            }
        }
        Ok(())
    }

    pub(crate) fn push_class(&mut self, top: WindowId) -> Result<()> {
        let rec = &self.registry.windows[top];
        let instance = rec.name.clone().unwrap_or_default();
        let class = rec
            .class
            .clone()
            .or_else(|| rec.app.map(|a| self.registry.apps[a].class.clone()))
            .unwrap_or_else(|| self.config.general.app_class.clone());
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        dc.conn.change_property8(
            PropMode::REPLACE,
            wrapper,
            AtomEnum::WM_CLASS,
            AtomEnum::STRING,
            &class_hint(&instance, &class),
        )?;
        Ok(())
    }

    /// `wm command`; `None` removes it
    pub fn set_command(&mut self, win: WindowId, argv: Option<Vec<String>>) -> Result<()> {
        self.wm_mut(win)?.command = argv;
        self.push_command(win)
    }

    pub(crate) fn push_command(&mut self, top: WindowId) -> Result<()> {
        let argv = self.wm(top)?.command.clone();
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        match argv {
            Some(argv) => {
                dc.conn.change_property8(
                    PropMode::REPLACE,
                    wrapper,
                    AtomEnum::WM_COMMAND,
                    AtomEnum::STRING,
                    &command_hint(&argv),
                )?;
            }
            None => {
                dc.conn.delete_property(wrapper, AtomEnum::WM_COMMAND.into())?;
            }
        }
        Ok(())
    }

    /// `wm client`; an empty name falls back to this host
    pub fn set_client(&mut self, win: WindowId, name: &str) -> Result<()> {
        self.wm_mut(win)?.client_machine = (!name.is_empty()).then(|| name.to_string());
        self.push_client_machine(win)
    }

    pub(crate) fn push_client_machine(&mut self, top: WindowId) -> Result<()> {
        let machine = self
            .wm(top)?
            .client_machine
            .clone()
            .unwrap_or_else(|| self.host_name.clone());
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        props::set_string(&dc.conn, wrapper, dc.atoms.wm_client_machine, &machine)?;
        Ok(())
    }

    pub(crate) fn push_pid(&mut self, top: WindowId) -> Result<()> {
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        dc.conn.change_property32(
            PropMode::REPLACE,
            wrapper,
            dc.atoms.net_wm_pid,
            AtomEnum::CARDINAL,
            &[std::process::id()],
        )?;
        Ok(())
    }

    /// `wm colormapwindows`: windows of this toplevel whose colormaps the
    /// window manager should install
    pub fn set_colormap_windows(&mut self, win: WindowId, windows: Vec<WindowId>) -> Result<()> {
        self.require_toplevel(win)?;
        for &w in &windows {
            if self.registry.toplevel_of(w) != Some(win) {
                return Err(WmError::BadValue(format!(
                    "can't set colormap windows: \"{}\" isn't in \"{}\"",
                    self.registry.path(w),
                    self.registry.path(win)
                ))
                .into());
            }
        }
        let wm = self.wm_mut(win)?;
        wm.colormap_windows = windows;
        wm.flags.insert(super::WmFlags::COLORMAPS_EXPLICIT);
        self.push_colormap_windows(win)
    }

    pub(crate) fn push_colormap_windows(&mut self, top: WindowId) -> Result<()> {
        let windows = self.wm(top)?.colormap_windows.clone();
        if windows.is_empty() || self.realized(top).is_none() {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(windows.len() + 1);
        for w in &windows {
            ids.push(self.make_exist(*w)?);
        }
        // The toplevel's own colormap is installed last unless listed.
        if !windows.contains(&top) {
            ids.push(self.make_exist(top)?);
        }
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        dc.conn.change_property32(
            PropMode::REPLACE,
            wrapper,
            dc.atoms.wm_colormap_windows,
            AtomEnum::WINDOW,
            &ids,
        )?;
        Ok(())
    }

    /// `wm iconphoto`
    pub fn set_icon_photo(&mut self, win: WindowId, images: &[IconImage]) -> Result<()> {
        self.wm_mut(win)?.icon_photo = pack_icon(images);
        self.push_icon_photo(win)
    }

    pub(crate) fn push_icon_photo(&mut self, top: WindowId) -> Result<()> {
        let data = self.wm(top)?.icon_photo.clone();
        let Some((dc, wrapper)) = self.realized(top) else {
            return Ok(());
        };
        if data.is_empty() {
            dc.conn.delete_property(wrapper, dc.atoms.net_wm_icon)?;
        } else {
            dc.conn.change_property32(
                PropMode::REPLACE,
                wrapper,
                dc.atoms.net_wm_icon,
                AtomEnum::CARDINAL,
                &data,
            )?;
        }
        Ok(())
    }

    /// `wm group`; the leader is the toplevel of `leader`
    pub fn set_group(&mut self, win: WindowId, leader: Option<WindowId>) -> Result<()> {
        self.require_toplevel(win)?;
        let leader = match leader {
            Some(l) => {
                let top = self.registry.toplevel_of(l).ok_or_else(|| self.no_such_window(l))?;
                self.realize_if_connected(top)?;
                Some(top)
            }
            None => None,
        };
        self.wm_mut(win)?.group = leader;
        self.update_hints(win)
    }

    /// `wm focusmodel`: an active application sets focus itself and does
    /// not ask the window manager for input
    pub fn set_focus_model(&mut self, win: WindowId, active: bool) -> Result<()> {
        self.wm_mut(win)?.hints.input = !active;
        self.update_hints(win)
    }

    /// `wm iconbitmap` / `wm iconmask`: server pixmaps for the icon
    pub fn set_icon_pixmaps(&mut self, win: WindowId, pixmap: Option<u32>, mask: Option<u32>) -> Result<()> {
        let wm = self.wm_mut(win)?;
        wm.hints.icon_pixmap = pixmap;
        wm.hints.icon_mask = mask;
        self.update_hints(win)
    }

    /// `wm iconposition`
    pub fn set_icon_position(&mut self, win: WindowId, position: Option<(i32, i32)>) -> Result<()> {
        self.wm_mut(win)?.hints.icon_position = position;
        self.update_hints(win)
    }

    /// `wm iconwindow`: use toplevel `icon` as the icon of `win`
    pub fn set_icon_window(&mut self, win: WindowId, icon: Option<WindowId>) -> Result<()> {
        self.require_toplevel(win)?;
        let old = self.wm(win)?.icon;
        if let Some(icon) = icon {
            if self.registry.wm(icon).is_none() {
                return Err(WmError::BadValue(format!(
                    "can't use {} as icon window: not at top level",
                    self.registry.path(icon)
                ))
                .into());
            }
            if let Some(owner) = self.wm(icon)?.icon_for {
                return Err(WmError::BadValue(format!(
                    "{} is already an icon for {}",
                    self.registry.path(icon),
                    self.registry.path(owner)
                ))
                .into());
            }
        }
        if let Some(old) = old.filter(|&o| Some(o) != icon) {
            if let Some(owm) = self.registry.wm_mut(old) {
                owm.icon_for = None;
                owm.withdrawn = true;
                owm.hints.initial_state = WmState::Withdrawn;
            }
        }
        self.wm_mut(win)?.icon = icon;
        if let Some(icon) = icon {
            self.realize_if_connected(icon)?;
            let iwm = self.wm_mut(icon)?;
            iwm.icon_for = Some(win);
            let never_mapped = iwm.flags.contains(super::WmFlags::NEVER_MAPPED);
            if !never_mapped {
                self.withdraw_wrapper(icon)?;
                self.wait_for_map_notify(icon, false)?;
            }
        }
        self.update_hints(win)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::tests::detached;
    use crate::types::Gravity;

    #[test]
    fn test_icon_pack_and_unpack() {
        let small = IconImage {
            width: 2,
            height: 1,
            pixels: vec![0xff000000, 0xffffffff],
        };
        let large = IconImage {
            width: 2,
            height: 2,
            pixels: vec![1, 2, 3, 4],
        };
        let data = pack_icon(&[small.clone(), large.clone()]);
        assert_eq!(&data[..4], &[2, 1, 0xff000000, 0xffffffff]);
        assert_eq!(data.len(), 4 + 6);
        assert_eq!(unpack_icon(&data), vec![small, large]);
    }

    #[test]
    fn test_icon_short_pixels_are_padded() {
        let image = IconImage {
            width: 2,
            height: 2,
            pixels: vec![7],
        };
        assert_eq!(pack_icon(&[image]), vec![2, 2, 7, 0, 0, 0]);
        // truncated trailing entry is dropped
        assert!(unpack_icon(&[4, 4, 1, 2]).is_empty());
    }

    #[test]
    fn test_class_and_command_hints() {
        assert_eq!(class_hint("top", "Demo"), b"top\0Demo\0".to_vec());
        let argv = vec!["wish".to_string(), "app.tcl".to_string()];
        assert_eq!(command_hint(&argv), b"wish\0app.tcl\0".to_vec());
    }

    #[test]
    fn test_normal_hints_flags() {
        let mut wm = WmInfo::new(1280, 800);
        wm.parse_geometry("300x200+10+20").unwrap();
        wm.size_hints_flags.insert(SizeHintFlags::P_ASPECT | SizeHintFlags::P_WIN_GRAVITY);
        wm.min_aspect = (1, 2);
        wm.max_aspect = (2, 1);
        wm.gravity = Gravity::SouthEast;
        let hints = wm.normal_hints(200, 200, 300, 200);
        assert!(matches!(hints.position, Some((WmSizeHintsSpecification::UserSpecified, 10, 20))));
        assert_eq!(hints.min_size, Some((1, 1)));
        assert_eq!(hints.max_size, None);
        assert!(hints.aspect.is_some());
        assert_eq!(hints.win_gravity, Some(x11rb::protocol::xproto::Gravity::SOUTH_EAST));
        assert_eq!(hints.size_increment, None);
    }

    #[test]
    fn test_setters_on_detached_display() {
        let (mut tk, _, _, main) = detached();
        assert_eq!(tk.title(main).unwrap(), "demo");
        tk.set_title(main, "Hello").unwrap();
        assert_eq!(tk.title(main).unwrap(), "Hello");
        tk.set_icon_name(main, "hi").unwrap();
        tk.set_command(main, Some(vec!["demo".into()])).unwrap();
        tk.set_focus_model(main, true).unwrap();
        assert!(!tk.registry.wm(main).unwrap().hints.input);
        tk.set_icon_name(main, "").unwrap();
        assert_eq!(tk.registry.wm(main).unwrap().icon_name, None);
    }

    #[test]
    fn test_icon_window_relationship() {
        let (mut tk, _, _, main) = detached();
        let icon = tk.new_toplevel(main, "icon", None).unwrap();
        let other = tk.new_toplevel(main, "other", None).unwrap();
        tk.set_icon_window(main, Some(icon)).unwrap();
        assert_eq!(tk.registry.wm(icon).unwrap().icon_for, Some(main));
        assert_eq!(tk.wm_state_name(icon).unwrap(), "icon");

        let err = tk.set_icon_window(other, Some(icon)).unwrap_err();
        assert_eq!(err.to_string(), ".icon is already an icon for .");

        tk.set_icon_window(main, None).unwrap();
        let iwm = tk.registry.wm(icon).unwrap();
        assert_eq!(iwm.icon_for, None);
        assert!(iwm.withdrawn);
        assert_eq!(tk.wm_state_name(icon).unwrap(), "withdrawn");
    }

    #[test]
    fn test_icon_window_death_updates_owner() {
        let (mut tk, _, _, main) = detached();
        let icon = tk.new_toplevel(main, "icon", None).unwrap();
        tk.set_icon_window(main, Some(icon)).unwrap();
        tk.destroy_window(icon).unwrap();
        assert_eq!(tk.registry.wm(main).unwrap().icon, None);
    }

    #[test]
    fn test_colormap_windows_must_be_inside() {
        let (mut tk, _, _, main) = detached();
        let inside = tk.create_window(main, "canvas").unwrap();
        let top = tk.new_toplevel(main, "t", None).unwrap();
        tk.set_colormap_windows(main, vec![inside]).unwrap();
        let err = tk.set_colormap_windows(main, vec![top]).unwrap_err();
        assert!(err.to_string().contains("isn't in"));
    }

    #[test]
    fn test_icon_photo_and_pixmaps_are_recorded() {
        let (mut tk, _, _, main) = detached();
        let image = IconImage {
            width: 1,
            height: 2,
            pixels: vec![0xff00_0000, 0xffff_ffff],
        };
        tk.set_icon_photo(main, &[image]).unwrap();
        assert_eq!(tk.registry.wm(main).unwrap().icon_photo, vec![1, 2, 0xff00_0000, 0xffff_ffff]);
        tk.set_icon_pixmaps(main, Some(0x600001), None).unwrap();
        let hints = &tk.registry.wm(main).unwrap().hints;
        assert_eq!((hints.icon_pixmap, hints.icon_mask), (Some(0x600001), None));
        tk.set_icon_photo(main, &[]).unwrap();
        assert!(tk.registry.wm(main).unwrap().icon_photo.is_empty());
    }
}
