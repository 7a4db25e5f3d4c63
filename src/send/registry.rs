//! The `InterpRegistry` property: which communication window answers to
//! which application name.

use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _, PropMode, Window};

use crate::error::Result;
use crate::registry::DisplayId;
use crate::toolkit::{DisplayConn, Toolkit};

/// Parsed registry property
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameRegistry {
    pub entries: Vec<(Window, String)>,
    pub modified: bool,
}

impl NameRegistry {
    /// Parse `"<hex window> <name>\0"` records; anything else is dropped
    pub fn parse(bytes: &[u8]) -> Self {
        let entries = bytes
            .split(|&b| b == 0)
            .filter_map(|record| {
                let record = String::from_utf8_lossy(record);
                let (id, name) = record.split_once(' ')?;
                let window = Window::from_str_radix(id, 16).ok()?;
                Some((window, name.to_string()))
            })
            .collect();
        Self {
            entries,
            modified: false,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (window, name) in &self.entries {
            out.extend_from_slice(format!("{:x} {}", window, name).as_bytes());
            out.push(0);
        }
        out
    }

    pub fn find(&self, name: &str) -> Option<Window> {
        self.entries.iter().find(|(_, n)| n == name).map(|&(w, _)| w)
    }

    pub fn add(&mut self, name: &str, window: Window) {
        self.entries.push((window, name.to_string()));
        self.modified = true;
    }

    pub fn delete(&mut self, name: &str) {
        let before = self.entries.len();
        self.entries.retain(|(_, n)| n != name);
        if self.entries.len() != before {
            self.modified = true;
        }
    }
}

/// `n`th candidate for `desired`: the name itself, then "name #2", ...
pub fn candidate_name(desired: &str, n: usize) -> String {
    if n <= 1 {
        desired.to_string()
    } else {
        format!("{} #{}", desired, n)
    }
}

/// Root of the default screen, where the registry lives
fn registry_root(tk: &Toolkit, display: DisplayId) -> Window {
    let d = tk.registry.display(display);
    d.screen(d.default_screen).root
}

/// An open registry; holds the server grab when opened locked
pub(crate) struct OpenRegistry {
    pub names: NameRegistry,
    root: Window,
    locked: bool,
}

impl Toolkit {
    /// Read the registry, grabbing the server first when `lock` is set so
    /// the read-modify-write cannot interleave with another client's
    pub(crate) fn registry_open(&self, display: DisplayId, lock: bool) -> Result<OpenRegistry> {
        let root = registry_root(self, display);
        let dc = self.conn(display)?;
        if lock {
            dc.conn.grab_server()?;
        }
        let names = match crate::props::get_bytes(&dc.conn, root, dc.atoms.interp_registry, false) {
            Ok(Some(bytes)) => NameRegistry::parse(&bytes),
            Ok(None) => NameRegistry::default(),
            Err(e) => {
                if lock {
                    dc.conn.ungrab_server()?;
                }
                return Err(e.into());
            }
        };
        Ok(OpenRegistry { names, root, locked: lock })
    }

    /// Write back a modified registry and release the server grab
    pub(crate) fn registry_close(&self, display: DisplayId, reg: OpenRegistry) -> Result<()> {
        let dc = self.conn(display)?;
        let written = write_registry(dc, &reg);
        if reg.locked {
            dc.conn.ungrab_server()?;
        }
        x11rb::connection::Connection::flush(&dc.conn)?;
        written
    }
}

fn write_registry(dc: &DisplayConn, reg: &OpenRegistry) -> Result<()> {
    if !reg.names.modified {
        return Ok(());
    }
    let bytes = reg.names.serialize();
    log::debug!("rewriting name registry: {} entries", reg.names.entries.len());
    dc.conn.change_property(
        PropMode::REPLACE,
        reg.root,
        dc.atoms.interp_registry,
        AtomEnum::STRING,
        8,
        bytes.len() as u32,
        &bytes,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize() {
        let reg = NameRegistry::parse(b"1e00004 app\0" as &[u8]);
        assert_eq!(reg.entries, vec![(0x1e00004, "app".to_string())]);
        let mut reg = NameRegistry::parse(b"1e00004 app\0junk\0zz bad\02a00001 app #2\0");
        assert_eq!(reg.find("app #2"), Some(0x2a00001));
        assert_eq!(reg.find("junk"), None);
        assert!(!reg.modified);
        reg.delete("app");
        assert!(reg.modified);
        assert_eq!(reg.serialize(), b"2a00001 app #2\0".to_vec());
    }

    #[test]
    fn test_names_with_spaces_survive() {
        let mut reg = NameRegistry::default();
        reg.add("my app #3", 0x400007);
        assert_eq!(NameRegistry::parse(&reg.serialize()).find("my app #3"), Some(0x400007));
        reg.delete("other");
        assert_eq!(reg.entries.len(), 1);
    }

    #[test]
    fn test_candidate_names() {
        let names: Vec<String> = (1..=3).map(|n| candidate_name("app", n)).collect();
        assert_eq!(names, vec!["app", "app #2", "app #3"]);
    }
}
