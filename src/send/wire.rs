//! Records exchanged through the `Comm` property.
//!
//! Every record starts with a NUL, then a one-letter kind (`c` command,
//! `r` reply) and a NUL, then `-x value` options each terminated by a NUL.
//! Several records may be appended to the property before the receiver gets
//! to read it.

use x11rb::protocol::xproto::Window;

use crate::interp::CODE_OK;

/// Where a synchronous command wants its reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    pub window: Window,
    /// Sender's serial, echoed back verbatim
    pub serial: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Target application name
    pub name: String,
    pub script: String,
    /// `None` for asynchronous sends
    pub reply_to: Option<ReplyTo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub serial: u32,
    pub code: i32,
    pub result: String,
    pub error_info: Option<String>,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Command(Command),
    Reply(Reply),
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = b"\0c\0-n ".to_vec();
        out.extend_from_slice(self.name.as_bytes());
        if let Some(to) = &self.reply_to {
            out.extend_from_slice(format!("\0-r {:x} {}", to.window, to.serial).as_bytes());
        }
        out.extend_from_slice(b"\0-s ");
        out.extend_from_slice(self.script.as_bytes());
        out.push(0);
        out
    }
}

impl Reply {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("\0r\0-s {}\0-c {}\0-r ", self.serial, self.code).into_bytes();
        out.extend_from_slice(self.result.as_bytes());
        if self.code != CODE_OK {
            if let Some(info) = &self.error_info {
                out.extend_from_slice(b"\0-i ");
                out.extend_from_slice(info.as_bytes());
            }
            if let Some(code) = &self.error_code {
                out.extend_from_slice(b"\0-e ");
                out.extend_from_slice(code.as_bytes());
            }
        }
        out.push(0);
        out
    }
}

/// Leading integer of `s` after optional blanks, like `sscanf(" %d")`
fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

/// Option value after `-x `, if the option has the space form
fn value(field: &str) -> Option<&str> {
    field.get(2..).and_then(|rest| rest.strip_prefix(' '))
}

/// Parse everything in a property value. Malformed records are skipped;
/// unknown options are ignored.
pub fn decode(bytes: &[u8]) -> Vec<Record> {
    let fields: Vec<String> = bytes
        .split(|&b| b == 0)
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect();
    let mut records = Vec::new();
    let mut i = 0;
    while i < fields.len() {
        let kind = fields[i].as_str();
        i += 1;
        if kind != "c" && kind != "r" {
            continue;
        }
        let start = i;
        while i < fields.len() && fields[i].starts_with('-') {
            i += 1;
        }
        let options = &fields[start..i];
        let record = if kind == "c" {
            decode_command(options).map(Record::Command)
        } else {
            decode_reply(options).map(Record::Reply)
        };
        match record {
            Some(r) => records.push(r),
            None => log::debug!("skipping malformed {} record", kind),
        }
    }
    records
}

fn decode_command(options: &[String]) -> Option<Command> {
    let mut name = None;
    let mut script = None;
    let mut reply_to = None;
    for field in options {
        match field.as_bytes().get(1) {
            Some(b'n') => name = value(field).or(name),
            Some(b's') => script = value(field).or(script),
            Some(b'r') => {
                reply_to = value(field).and_then(|v| v.split_once(' ')).and_then(|(window, serial)| {
                    let window = Window::from_str_radix(window, 16).ok()?;
                    Some(ReplyTo {
                        window,
                        serial: serial.to_string(),
                    })
                })
            }
            _ => {}
        }
    }
    Some(Command {
        name: name?.to_string(),
        script: script?.to_string(),
        reply_to,
    })
}

fn decode_reply(options: &[String]) -> Option<Reply> {
    let mut serial = None;
    let mut reply = Reply {
        serial: 0,
        code: CODE_OK,
        result: String::new(),
        error_info: None,
        error_code: None,
    };
    for field in options {
        let rest = field.get(2..).unwrap_or("");
        match field.as_bytes().get(1) {
            Some(b's') => serial = leading_int(rest).and_then(|s| u32::try_from(s).ok()).or(serial),
            Some(b'c') => reply.code = leading_int(rest).and_then(|c| i32::try_from(c).ok()).unwrap_or(CODE_OK),
            Some(b'r') => {
                if let Some(v) = value(field) {
                    reply.result = v.to_string();
                }
            }
            Some(b'i') => reply.error_info = value(field).map(str::to_string),
            Some(b'e') => reply.error_code = value(field).map(str::to_string),
            _ => {}
        }
    }
    reply.serial = serial?;
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        let cmd = Command {
            name: "app #2".into(),
            script: "winfo name .".into(),
            reply_to: Some(ReplyTo {
                window: 0x1e00004,
                serial: "17".into(),
            }),
        };
        assert_eq!(cmd.encode(), b"\0c\0-n app #2\0-r 1e00004 17\0-s winfo name .\0".to_vec());
        let async_cmd = Command { reply_to: None, ..cmd };
        assert_eq!(async_cmd.encode(), b"\0c\0-n app #2\0-s winfo name .\0".to_vec());
    }

    #[test]
    fn test_reply_encoding_omits_error_state_on_success() {
        let mut reply = Reply {
            serial: 3,
            code: 0,
            result: "ok".into(),
            error_info: Some("ignored".into()),
            error_code: None,
        };
        assert_eq!(reply.encode(), b"\0r\0-s 3\0-c 0\0-r ok\0".to_vec());
        reply.code = 1;
        reply.error_code = Some("TK WM".into());
        assert_eq!(reply.encode(), b"\0r\0-s 3\0-c 1\0-r ok\0-i ignored\0-e TK WM\0".to_vec());
    }

    #[test]
    fn test_decode_several_records() {
        let mut bytes = Command {
            name: "a".into(),
            script: "set x 1".into(),
            reply_to: None,
        }
        .encode();
        bytes.extend(
            Reply {
                serial: 9,
                code: 1,
                result: "boom".into(),
                error_info: Some("boom\n    while executing".into()),
                error_code: Some("NONE".into()),
            }
            .encode(),
        );
        let records = decode(&bytes);
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], Record::Command(c) if c.script == "set x 1" && c.reply_to.is_none()));
        let Record::Reply(r) = &records[1] else {
            panic!("expected a reply");
        };
        assert_eq!((r.serial, r.code, r.result.as_str()), (9, 1, "boom"));
        assert_eq!(r.error_code.as_deref(), Some("NONE"));
    }

    #[test]
    fn test_decode_tolerates_unknown_options_and_any_order() {
        let records = decode(b"\0r\0-x future\0-r res\0-c 1\0-s 42\0");
        assert_eq!(
            records,
            vec![Record::Reply(Reply {
                serial: 42,
                code: 1,
                result: "res".into(),
                error_info: None,
                error_code: None,
            })]
        );
    }

    #[test]
    fn test_decode_skips_malformed_records() {
        // command without a script, reply without a serial, junk
        let records = decode(b"\0c\0-n a\0\0r\0-c 0\0garbage\0c\0-n b\0-r zz 1\0-s go\0");
        assert_eq!(records.len(), 1);
        let Record::Command(c) = &records[0] else {
            panic!("expected a command");
        };
        assert_eq!(c.name, "b");
        // a bad reply window degrades to an asynchronous command
        assert_eq!(c.reply_to, None);
    }
}
