//! Script commands and the built-in interpreter.
//!
//! Each command word parses into a tagged enum ([`Command`], [`WmCommand`],
//! [`GrabCommand`], [`WinfoQuery`]) whose variants carry their arguments;
//! running a variant is one match arm against the [`Toolkit`] API.
//! [`CommandInterp`] evaluates scripts of these commands, with `$var` and
//! `[cmd]` substitution.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::XtkError;
use crate::interp::{Interp, InterpId, ScriptError};
use crate::registry::{AppId, WindowId};
use crate::toolkit::{IdleTask, Toolkit};
use crate::wm::netwm::Attribute;
use crate::wm::{SizeHintFlags, Source};
use crate::words::{self, Part, Word};

type Outcome = Result<String, ScriptError>;

fn wrong_args(usage: &str) -> ScriptError {
    ScriptError::new(format!("wrong # args: should be \"{}\"", usage))
}

fn int(s: &str) -> Result<i32, ScriptError> {
    s.trim()
        .parse()
        .map_err(|_| ScriptError::new(format!("expected integer but got \"{}\"", s)))
}

fn boolean(s: &str) -> Result<bool, ScriptError> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ScriptError::new(format!("expected boolean value but got \"{}\"", s))),
    }
}

fn flag(b: bool) -> String {
    if b { "1" } else { "0" }.to_string()
}

fn bad_option(kind: &str, got: &str, choices: &[&str]) -> ScriptError {
    let list = match choices.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{}, or {}", rest.join(", "), last),
        Some((last, _)) => last.to_string(),
        None => String::new(),
    };
    ScriptError::new(format!("bad {} \"{}\": must be {}", kind, got, list))
}

/// Parent path and last name of a new window's path
fn split_path(path: &str) -> Result<(&str, &str), ScriptError> {
    let bad = || ScriptError::new(format!("bad window path name \"{}\"", path));
    if !path.starts_with('.') || path == "." || path.ends_with('.') {
        return Err(bad());
    }
    let (parent, name) = path.rsplit_once('.').ok_or_else(bad)?;
    Ok((if parent.is_empty() { "." } else { parent }, name))
}

/// `-option value` pairs after the fixed arguments
fn options<'a>(args: &'a [String], usage: &str) -> Result<Vec<(&'a str, &'a str)>, ScriptError> {
    if args.len() % 2 != 0 {
        return Err(wrong_args(usage));
    }
    Ok(args.chunks(2).map(|c| (c[0].as_str(), c[1].as_str())).collect())
}

/// `wm` subcommands; `None` arguments are queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WmCommand {
    Aspect { path: String, value: Option<Option<[i32; 4]>> },
    Attributes { path: String, args: Vec<String> },
    Client { path: String, name: Option<String> },
    ColormapWindows { path: String, windows: Option<Vec<String>> },
    Command { path: String, argv: Option<Vec<String>> },
    Deiconify(String),
    FocusModel { path: String, active: Option<bool> },
    Frame(String),
    Geometry { path: String, spec: Option<String> },
    Grid { path: String, grid: Option<Option<[i32; 4]>> },
    Group { path: String, leader: Option<String> },
    Iconify(String),
    IconName { path: String, name: Option<String> },
    IconPosition { path: String, position: Option<Option<(i32, i32)>> },
    IconWindow { path: String, icon: Option<String> },
    MaxSize { path: String, size: Option<(i32, i32)> },
    MinSize { path: String, size: Option<(i32, i32)> },
    PositionFrom { path: String, source: Option<Option<Source>> },
    Protocol { path: String, name: Option<String>, command: Option<String> },
    Resizable { path: String, value: Option<(bool, bool)> },
    SizeFrom { path: String, source: Option<Option<Source>> },
    StackOrder { path: String, compare: Option<(bool, String)> },
    State { path: String, state: Option<String> },
    Title { path: String, title: Option<String> },
    Tracing(Option<bool>),
    Transient { path: String, master: Option<String> },
    Withdraw(String),
}

const WM_OPTIONS: &[&str] = &[
    "aspect",
    "attributes",
    "client",
    "colormapwindows",
    "command",
    "deiconify",
    "focusmodel",
    "frame",
    "geometry",
    "grid",
    "group",
    "iconify",
    "iconname",
    "iconposition",
    "iconwindow",
    "maxsize",
    "minsize",
    "positionfrom",
    "protocol",
    "resizable",
    "sizefrom",
    "stackorder",
    "state",
    "title",
    "tracing",
    "transient",
    "withdraw",
];

fn source(s: &str) -> Result<Option<Source>, ScriptError> {
    match s {
        "" => Ok(None),
        "user" => Ok(Some(Source::User)),
        "program" => Ok(Some(Source::Program)),
        other => Err(bad_option("argument", other, &["program", "user"])),
    }
}

/// Four integers, or four empty strings for "none"
fn quad(args: &[String]) -> Result<Option<[i32; 4]>, ScriptError> {
    if args.iter().all(|a| a.is_empty()) {
        return Ok(None);
    }
    Ok(Some([int(&args[0])?, int(&args[1])?, int(&args[2])?, int(&args[3])?]))
}

impl WmCommand {
    pub fn parse(argv: &[String]) -> Result<Self, ScriptError> {
        let Some(option) = argv.get(1) else {
            return Err(wrong_args("wm option window ?arg ...?"));
        };
        if !WM_OPTIONS.contains(&option.as_str()) {
            return Err(bad_option("option", option, WM_OPTIONS));
        }
        if option == "tracing" {
            return match argv.len() {
                2 => Ok(WmCommand::Tracing(None)),
                3 => Ok(WmCommand::Tracing(Some(boolean(&argv[2])?))),
                _ => Err(wrong_args("wm tracing ?boolean?")),
            };
        }
        let Some(path) = argv.get(2).cloned() else {
            return Err(wrong_args("wm option window ?arg ...?"));
        };
        let rest = &argv[3..];
        let usage = |args: &str| wrong_args(&format!("wm {} window {}", option, args).trim_end().to_string());
        let opt = |max: usize, args: &str| -> Result<Option<String>, ScriptError> {
            match rest.len() {
                0 => Ok(None),
                n if n <= max => Ok(Some(rest[0].clone())),
                _ => Err(usage(args)),
            }
        };
        Ok(match option.as_str() {
            "aspect" => WmCommand::Aspect {
                value: match rest.len() {
                    0 => None,
                    4 => Some(quad(rest)?),
                    _ => return Err(usage("?minNumer minDenom maxNumer maxDenom?")),
                },
                path,
            },
            "attributes" => WmCommand::Attributes {
                path,
                args: rest.to_vec(),
            },
            "client" => WmCommand::Client {
                name: opt(1, "?name?")?,
                path,
            },
            "colormapwindows" => WmCommand::ColormapWindows {
                windows: match opt(1, "?windowList?")? {
                    None => None,
                    Some(list) => Some(words::split_list(&list).map_err(|e| ScriptError::new(e.to_string()))?),
                },
                path,
            },
            "command" => WmCommand::Command {
                argv: match opt(1, "?value?")? {
                    None => None,
                    Some(list) => Some(words::split_list(&list).map_err(|e| ScriptError::new(e.to_string()))?),
                },
                path,
            },
            "deiconify" | "iconify" | "withdraw" | "frame" if !rest.is_empty() => return Err(usage("")),
            "deiconify" => WmCommand::Deiconify(path),
            "iconify" => WmCommand::Iconify(path),
            "withdraw" => WmCommand::Withdraw(path),
            "frame" => WmCommand::Frame(path),
            "focusmodel" => WmCommand::FocusModel {
                active: match opt(1, "?active|passive?")?.as_deref() {
                    None => None,
                    Some("active") => Some(true),
                    Some("passive") => Some(false),
                    Some(other) => return Err(bad_option("argument", other, &["active", "passive"])),
                },
                path,
            },
            "geometry" => WmCommand::Geometry {
                spec: opt(1, "?newGeometry?")?,
                path,
            },
            "grid" => WmCommand::Grid {
                grid: match rest.len() {
                    0 => None,
                    4 => Some(quad(rest)?),
                    _ => return Err(usage("?baseWidth baseHeight widthInc heightInc?")),
                },
                path,
            },
            "group" => WmCommand::Group {
                leader: opt(1, "?pathName?")?,
                path,
            },
            "iconname" => WmCommand::IconName {
                name: opt(1, "?newName?")?,
                path,
            },
            "iconposition" => WmCommand::IconPosition {
                position: match rest {
                    [] => None,
                    [x, y] if x.is_empty() && y.is_empty() => Some(None),
                    [x, y] => Some(Some((int(x)?, int(y)?))),
                    _ => return Err(usage("?x y?")),
                },
                path,
            },
            "iconwindow" => WmCommand::IconWindow {
                icon: opt(1, "?pathName?")?,
                path,
            },
            "maxsize" | "minsize" => {
                let size = match rest {
                    [] => None,
                    [w, h] => Some((int(w)?, int(h)?)),
                    _ => return Err(usage("?width height?")),
                };
                if option == "maxsize" {
                    WmCommand::MaxSize { path, size }
                } else {
                    WmCommand::MinSize { path, size }
                }
            }
            "positionfrom" | "sizefrom" => {
                let source = match opt(1, "?user/program?")? {
                    None => None,
                    Some(s) => Some(source(&s)?),
                };
                if option == "positionfrom" {
                    WmCommand::PositionFrom { path, source }
                } else {
                    WmCommand::SizeFrom { path, source }
                }
            }
            "protocol" => {
                if rest.len() > 2 {
                    return Err(usage("?name? ?command?"));
                }
                WmCommand::Protocol {
                    name: rest.first().cloned(),
                    command: rest.get(1).cloned(),
                    path,
                }
            }
            "resizable" => WmCommand::Resizable {
                value: match rest {
                    [] => None,
                    [w, h] => Some((boolean(w)?, boolean(h)?)),
                    _ => return Err(usage("?width height?")),
                },
                path,
            },
            "stackorder" => WmCommand::StackOrder {
                compare: match rest {
                    [] => None,
                    [how, other] => match how.as_str() {
                        "isabove" => Some((true, other.clone())),
                        "isbelow" => Some((false, other.clone())),
                        _ => return Err(bad_option("argument", how, &["isabove", "isbelow"])),
                    },
                    _ => return Err(usage("?isabove|isbelow window?")),
                },
                path,
            },
            "state" => WmCommand::State {
                state: opt(1, "?state?")?,
                path,
            },
            "title" => WmCommand::Title {
                title: opt(1, "?newTitle?")?,
                path,
            },
            "transient" => WmCommand::Transient {
                master: opt(1, "?master?")?,
                path,
            },
            other => return Err(bad_option("option", other, WM_OPTIONS)),
        })
    }

    pub fn run(self, tk: &mut Toolkit, app: AppId) -> Outcome {
        let win = |tk: &Toolkit, path: &str| tk.window_by_path(app, path).map_err(ScriptError::from);
        let path_of = |tk: &Toolkit, w: Option<WindowId>| w.map(|w| tk.registry.path(w)).unwrap_or_default();
        match self {
            WmCommand::Aspect { path, value } => {
                let w = win(tk, &path)?;
                match value {
                    None => {
                        let wm = tk.wm(w)?;
                        if !wm.size_hints_flags.contains(SizeHintFlags::P_ASPECT) {
                            return Ok(String::new());
                        }
                        Ok(format!(
                            "{} {} {} {}",
                            wm.min_aspect.0, wm.min_aspect.1, wm.max_aspect.0, wm.max_aspect.1
                        ))
                    }
                    Some(v) => {
                        tk.set_aspect(w, v.map(|[a, b, c, d]| ((a, b), (c, d))))?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Attributes { path, args } => run_attributes(tk, win(tk, &path)?, &args),
            WmCommand::Client { path, name } => {
                let w = win(tk, &path)?;
                match name {
                    None => Ok(tk.wm(w)?.client_machine.clone().unwrap_or_default()),
                    Some(name) => {
                        tk.set_client(w, &name)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::ColormapWindows { path, windows } => {
                let w = win(tk, &path)?;
                match windows {
                    None => Ok(words::join(tk.wm(w)?.colormap_windows.iter().map(|&c| tk.registry.path(c)))),
                    Some(paths) => {
                        let list = paths.iter().map(|p| win(tk, p)).collect::<Result<Vec<_>, _>>()?;
                        tk.set_colormap_windows(w, list)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Command { path, argv } => {
                let w = win(tk, &path)?;
                match argv {
                    None => Ok(tk.wm(w)?.command.as_ref().map(words::join).unwrap_or_default()),
                    Some(argv) => {
                        tk.set_command(w, (!argv.is_empty()).then_some(argv))?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Deiconify(path) => {
                tk.deiconify(win(tk, &path)?)?;
                Ok(String::new())
            }
            WmCommand::FocusModel { path, active } => {
                let w = win(tk, &path)?;
                match active {
                    None => Ok(if tk.wm(w)?.hints.input { "passive" } else { "active" }.to_string()),
                    Some(active) => {
                        tk.set_focus_model(w, active)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Frame(path) => {
                let w = win(tk, &path)?;
                tk.require_toplevel(w)?;
                tk.make_exist(w)?;
                let frame = tk.wm(w)?.reparent.or_else(|| tk.wrapper_xid(w));
                Ok(frame.map(|f| format!("0x{:x}", f)).unwrap_or_default())
            }
            WmCommand::Geometry { path, spec } => {
                let w = win(tk, &path)?;
                match spec {
                    None => Ok(tk.geometry(w)?),
                    Some(spec) => {
                        tk.set_geometry(w, &spec)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Grid { path, grid } => {
                let w = win(tk, &path)?;
                match grid {
                    None => {
                        let wm = tk.wm(w)?;
                        if wm.grid_win.is_none() {
                            return Ok(String::new());
                        }
                        Ok(format!(
                            "{} {} {} {}",
                            wm.req_grid_width, wm.req_grid_height, wm.width_inc, wm.height_inc
                        ))
                    }
                    Some(grid) => {
                        tk.wm_grid(w, grid.map(|[a, b, c, d]| (a, b, c, d)))?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Group { path, leader } => {
                let w = win(tk, &path)?;
                match leader {
                    None => Ok(path_of(tk, tk.wm(w)?.group)),
                    Some(leader) => {
                        let leader = if leader.is_empty() { None } else { Some(win(tk, &leader)?) };
                        tk.set_group(w, leader)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Iconify(path) => {
                tk.iconify(win(tk, &path)?)?;
                Ok(String::new())
            }
            WmCommand::IconName { path, name } => {
                let w = win(tk, &path)?;
                match name {
                    None => Ok(tk.wm(w)?.icon_name.clone().unwrap_or_default()),
                    Some(name) => {
                        tk.set_icon_name(w, &name)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::IconPosition { path, position } => {
                let w = win(tk, &path)?;
                match position {
                    None => Ok(tk
                        .wm(w)?
                        .hints
                        .icon_position
                        .map(|(x, y)| format!("{} {}", x, y))
                        .unwrap_or_default()),
                    Some(position) => {
                        tk.set_icon_position(w, position)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::IconWindow { path, icon } => {
                let w = win(tk, &path)?;
                match icon {
                    None => Ok(path_of(tk, tk.wm(w)?.icon)),
                    Some(icon) => {
                        let icon = if icon.is_empty() { None } else { Some(win(tk, &icon)?) };
                        tk.set_icon_window(w, icon)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::MaxSize { path, size } => {
                let w = win(tk, &path)?;
                match size {
                    None => {
                        let rec = &tk.registry.windows[w];
                        let (mw, mh) = tk.wm(w)?.max_size(rec.req_width, rec.req_height);
                        Ok(format!("{} {}", mw, mh))
                    }
                    Some((mw, mh)) => {
                        tk.set_max_size(w, mw, mh)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::MinSize { path, size } => {
                let w = win(tk, &path)?;
                match size {
                    None => {
                        let wm = tk.wm(w)?;
                        Ok(format!("{} {}", wm.min_width, wm.min_height))
                    }
                    Some((mw, mh)) => {
                        tk.set_min_size(w, mw, mh)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::PositionFrom { path, source } => {
                let w = win(tk, &path)?;
                match source {
                    None => Ok(source_name(
                        tk.wm(w)?.size_hints_flags,
                        SizeHintFlags::US_POSITION,
                        SizeHintFlags::P_POSITION,
                    )),
                    Some(source) => {
                        tk.set_position_from(w, source)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::SizeFrom { path, source } => {
                let w = win(tk, &path)?;
                match source {
                    None => Ok(source_name(
                        tk.wm(w)?.size_hints_flags,
                        SizeHintFlags::US_SIZE,
                        SizeHintFlags::P_SIZE,
                    )),
                    Some(source) => {
                        tk.set_size_from(w, source)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Protocol { path, name, command } => {
                let w = win(tk, &path)?;
                match (name, command) {
                    (None, _) => Ok(words::join(tk.protocols(w)?)),
                    (Some(name), None) => Ok(tk.protocol_command(w, &name)?.unwrap_or_default()),
                    (Some(name), Some(command)) => {
                        tk.set_protocol(w, &name, Some(&command))?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Resizable { path, value } => {
                let w = win(tk, &path)?;
                match value {
                    None => {
                        let flags = tk.wm(w)?.flags;
                        Ok(format!(
                            "{} {}",
                            flag(!flags.contains(crate::wm::WmFlags::WIDTH_NOT_RESIZABLE)),
                            flag(!flags.contains(crate::wm::WmFlags::HEIGHT_NOT_RESIZABLE))
                        ))
                    }
                    Some((width, height)) => {
                        tk.set_resizable(w, width, height)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::StackOrder { path, compare } => {
                let w = win(tk, &path)?;
                match compare {
                    None => Ok(words::join(tk.stackorder(w)?.into_iter().map(|t| tk.registry.path(t)))),
                    Some((above, other)) => {
                        let other = win(tk, &other)?;
                        let answer = if above { tk.is_above(w, other)? } else { tk.is_below(w, other)? };
                        Ok(flag(answer))
                    }
                }
            }
            WmCommand::State { path, state } => {
                let w = win(tk, &path)?;
                match state {
                    None => Ok(tk.wm_state_name(w)?.to_string()),
                    Some(state) => {
                        tk.set_state_by_name(w, &state)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Title { path, title } => {
                let w = win(tk, &path)?;
                match title {
                    None => Ok(tk.title(w)?),
                    Some(title) => {
                        tk.set_title(w, &title)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Tracing(on) => match on {
                None => Ok(flag(tk.tracer.is_enabled())),
                Some(on) => {
                    tk.config.wm.trace = on;
                    tk.set_tracing(on);
                    Ok(String::new())
                }
            },
            WmCommand::Transient { path, master } => {
                let w = win(tk, &path)?;
                match master {
                    None => Ok(path_of(tk, tk.transient(w)?)),
                    Some(master) => {
                        let master = if master.is_empty() { None } else { Some(win(tk, &master)?) };
                        tk.set_transient(w, master)?;
                        Ok(String::new())
                    }
                }
            }
            WmCommand::Withdraw(path) => {
                tk.withdraw(win(tk, &path)?)?;
                Ok(String::new())
            }
        }
    }
}

fn source_name(flags: SizeHintFlags, user: SizeHintFlags, program: SizeHintFlags) -> String {
    if flags.contains(user) {
        "user".to_string()
    } else if flags.contains(program) {
        "program".to_string()
    } else {
        String::new()
    }
}

fn run_attributes(tk: &mut Toolkit, w: WindowId, args: &[String]) -> Outcome {
    let current = tk.attributes(w)?;
    let value_of = |tk: &Toolkit, option: &str| -> Outcome {
        Ok(match option {
            "-alpha" => format!("{:?}", current.alpha),
            "-topmost" => flag(current.topmost),
            "-zoomed" => flag(current.zoomed),
            "-fullscreen" => flag(current.fullscreen),
            "-type" => words::join(tk.window_type(w)?),
            other => return Err(unknown_attribute(other)),
        })
    };
    match args {
        [] => {
            let mut out = Vec::new();
            for option in ["-alpha", "-topmost", "-zoomed", "-fullscreen", "-type"] {
                out.push(option.to_string());
                out.push(value_of(tk, option)?);
            }
            Ok(words::join(out))
        }
        [option] => value_of(tk, option),
        _ => {
            for (option, value) in options(args, "wm attributes window ?-option value ...?")? {
                tk.set_attribute(w, Attribute::parse(option, value).map_err(XtkError::from)?)?;
            }
            Ok(String::new())
        }
    }
}

/// Error for an attribute name `Attribute::parse` does not know
fn unknown_attribute(option: &str) -> ScriptError {
    match Attribute::parse(option, "") {
        Err(e) => XtkError::from(e).into(),
        Ok(_) => ScriptError::new(format!("bad attribute \"{}\"", option)),
    }
}

/// `grab` subcommands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabCommand {
    Set { path: String, global: bool },
    Release(String),
    Status(String),
    Current(Option<String>),
}

impl GrabCommand {
    pub fn parse(argv: &[String]) -> Result<Self, ScriptError> {
        let args = &argv[1..];
        let set = |rest: &[String]| match rest {
            [path] if !path.starts_with('-') => Ok(GrabCommand::Set {
                path: path.clone(),
                global: false,
            }),
            [opt, path] if opt == "-global" => Ok(GrabCommand::Set {
                path: path.clone(),
                global: true,
            }),
            _ => Err(wrong_args("grab ?-global? window")),
        };
        match args.first().map(String::as_str) {
            None => Err(wrong_args("grab ?-global? window")),
            Some(p) if p.starts_with('.') || p == "-global" => set(args),
            Some("set") => set(&args[1..]),
            Some("release") => match &args[1..] {
                [path] => Ok(GrabCommand::Release(path.clone())),
                _ => Err(wrong_args("grab release window")),
            },
            Some("status") => match &args[1..] {
                [path] => Ok(GrabCommand::Status(path.clone())),
                _ => Err(wrong_args("grab status window")),
            },
            Some("current") => match &args[1..] {
                [] => Ok(GrabCommand::Current(None)),
                [path] => Ok(GrabCommand::Current(Some(path.clone()))),
                _ => Err(wrong_args("grab current ?window?")),
            },
            Some(other) => Err(bad_option("option", other, &["current", "release", "set", "status"])),
        }
    }

    pub fn run(self, tk: &mut Toolkit, app: AppId) -> Outcome {
        match self {
            GrabCommand::Set { path, global } => {
                let w = tk.window_by_path(app, &path)?;
                tk.grab(w, global)?;
                Ok(String::new())
            }
            GrabCommand::Release(path) => {
                // Releasing a window that no longer exists is not an error.
                if let Ok(w) = tk.window_by_path(app, &path) {
                    tk.ungrab(w)?;
                }
                Ok(String::new())
            }
            GrabCommand::Status(path) => {
                let w = tk.window_by_path(app, &path)?;
                Ok(tk.grab_status(w).to_string())
            }
            GrabCommand::Current(path) => {
                let display = match path {
                    Some(p) => Some(tk.registry.windows[tk.window_by_path(app, &p)?].display),
                    None => None,
                };
                Ok(words::join(tk.grab_current(display).into_iter().map(|w| tk.registry.path(w))))
            }
        }
    }
}

/// `winfo` queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WinfoQuery {
    Atom { name: String, displayof: Option<String> },
    AtomName { id: String, displayof: Option<String> },
    Children(String),
    Class(String),
    Exists(String),
    Geometry(String),
    Height(String),
    Id(String),
    Interps(Option<String>),
    IsMapped(String),
    Name(String),
    Parent(String),
    PointerXy(String),
    ReqHeight(String),
    ReqWidth(String),
    RootX(String),
    RootY(String),
    ScreenDepth(String),
    ScreenHeight(String),
    ScreenMmHeight(String),
    ScreenMmWidth(String),
    ScreenWidth(String),
    Toplevel(String),
    Viewable(String),
    VRootHeight(String),
    VRootWidth(String),
    VRootX(String),
    VRootY(String),
    Width(String),
    X(String),
    Y(String),
}

const WINFO_OPTIONS: &[&str] = &[
    "atom",
    "atomname",
    "children",
    "class",
    "exists",
    "geometry",
    "height",
    "id",
    "interps",
    "ismapped",
    "name",
    "parent",
    "pointerxy",
    "reqheight",
    "reqwidth",
    "rootx",
    "rooty",
    "screendepth",
    "screenheight",
    "screenmmheight",
    "screenmmwidth",
    "screenwidth",
    "toplevel",
    "viewable",
    "vrootheight",
    "vrootwidth",
    "vrootx",
    "vrooty",
    "width",
    "x",
    "y",
];

impl WinfoQuery {
    pub fn parse(argv: &[String]) -> Result<Self, ScriptError> {
        let Some(option) = argv.get(1) else {
            return Err(wrong_args("winfo option ?arg ...?"));
        };
        let rest = &argv[2..];
        // atom, atomname and interps take an optional -displayof
        let (displayof, rest) = match rest {
            [opt, w, tail @ ..] if opt == "-displayof" => (Some(w.clone()), tail),
            _ => (None, rest),
        };
        let with_displayof = |usage: &str, n: usize| -> Result<Vec<String>, ScriptError> {
            if rest.len() == n {
                Ok(rest.to_vec())
            } else {
                Err(wrong_args(&format!("winfo {} ?-displayof window? {}", option, usage).trim_end().to_string()))
            }
        };
        match option.as_str() {
            "atom" => {
                let args = with_displayof("name", 1)?;
                return Ok(WinfoQuery::Atom {
                    name: args[0].clone(),
                    displayof,
                });
            }
            "atomname" => {
                let args = with_displayof("id", 1)?;
                return Ok(WinfoQuery::AtomName {
                    id: args[0].clone(),
                    displayof,
                });
            }
            "interps" => {
                with_displayof("", 0)?;
                return Ok(WinfoQuery::Interps(displayof));
            }
            _ => {}
        }
        if !WINFO_OPTIONS.contains(&option.as_str()) {
            return Err(bad_option("option", option, WINFO_OPTIONS));
        }
        let [path] = &argv[2..] else {
            return Err(wrong_args(&format!("winfo {} window", option)));
        };
        let path = path.clone();
        Ok(match option.as_str() {
            "children" => WinfoQuery::Children(path),
            "class" => WinfoQuery::Class(path),
            "exists" => WinfoQuery::Exists(path),
            "geometry" => WinfoQuery::Geometry(path),
            "height" => WinfoQuery::Height(path),
            "id" => WinfoQuery::Id(path),
            "ismapped" => WinfoQuery::IsMapped(path),
            "name" => WinfoQuery::Name(path),
            "parent" => WinfoQuery::Parent(path),
            "pointerxy" => WinfoQuery::PointerXy(path),
            "reqheight" => WinfoQuery::ReqHeight(path),
            "reqwidth" => WinfoQuery::ReqWidth(path),
            "rootx" => WinfoQuery::RootX(path),
            "rooty" => WinfoQuery::RootY(path),
            "screendepth" => WinfoQuery::ScreenDepth(path),
            "screenheight" => WinfoQuery::ScreenHeight(path),
            "screenmmheight" => WinfoQuery::ScreenMmHeight(path),
            "screenmmwidth" => WinfoQuery::ScreenMmWidth(path),
            "screenwidth" => WinfoQuery::ScreenWidth(path),
            "toplevel" => WinfoQuery::Toplevel(path),
            "viewable" => WinfoQuery::Viewable(path),
            "vrootheight" => WinfoQuery::VRootHeight(path),
            "vrootwidth" => WinfoQuery::VRootWidth(path),
            "vrootx" => WinfoQuery::VRootX(path),
            "vrooty" => WinfoQuery::VRootY(path),
            "width" => WinfoQuery::Width(path),
            "x" => WinfoQuery::X(path),
            _ => WinfoQuery::Y(path),
        })
    }

    pub fn run(self, tk: &mut Toolkit, app: AppId) -> Outcome {
        let win = |tk: &Toolkit, path: &str| tk.window_by_path(app, path).map_err(ScriptError::from);
        let main = |tk: &Toolkit| {
            tk.registry
                .apps
                .get(app)
                .and_then(|a| a.main_window)
                .ok_or_else(|| ScriptError::from(XtkError::AppDestroyed))
        };
        let relative = |tk: &Toolkit, displayof: Option<String>| match displayof {
            Some(p) => win(tk, &p),
            None => main(tk),
        };
        Ok(match self {
            WinfoQuery::Atom { name, displayof } => {
                let w = relative(tk, displayof)?;
                tk.atom(w, &name)?.to_string()
            }
            WinfoQuery::AtomName { id, displayof } => {
                let w = relative(tk, displayof)?;
                let atom = id
                    .trim()
                    .parse()
                    .map_err(|_| ScriptError::new(format!("expected integer but got \"{}\"", id)))?;
                tk.atom_name(w, atom)?
            }
            WinfoQuery::Children(p) => {
                let w = win(tk, &p)?;
                words::join(tk.children(w)?.into_iter().map(|c| tk.registry.path(c)))
            }
            WinfoQuery::Class(p) => tk.window_class(win(tk, &p)?)?,
            WinfoQuery::Exists(p) => flag(tk.registry.lookup(app, &p).is_some_and(|w| tk.exists(w))),
            WinfoQuery::Geometry(p) => tk.geometry_string(win(tk, &p)?)?,
            WinfoQuery::Height(p) => tk.window_geometry(win(tk, &p)?)?.height.to_string(),
            WinfoQuery::Id(p) => {
                let w = win(tk, &p)?;
                format!("0x{:x}", tk.window_id(w)?)
            }
            WinfoQuery::Interps(displayof) => {
                let w = relative(tk, displayof)?;
                words::join(tk.interps_of(w)?)
            }
            WinfoQuery::IsMapped(p) => flag(tk.is_mapped(win(tk, &p)?)?),
            WinfoQuery::Name(p) => tk.window_name(win(tk, &p)?)?,
            WinfoQuery::Parent(p) => {
                let parent = tk.parent(win(tk, &p)?)?;
                parent.map(|w| tk.registry.path(w)).unwrap_or_default()
            }
            WinfoQuery::PointerXy(p) => {
                let (x, y) = tk.pointer_xy(win(tk, &p)?)?;
                format!("{} {}", x, y)
            }
            WinfoQuery::ReqHeight(p) => tk.requested_size(win(tk, &p)?)?.1.to_string(),
            WinfoQuery::ReqWidth(p) => tk.requested_size(win(tk, &p)?)?.0.to_string(),
            WinfoQuery::RootX(p) => tk.root_coords(win(tk, &p)?)?.0.to_string(),
            WinfoQuery::RootY(p) => tk.root_coords(win(tk, &p)?)?.1.to_string(),
            WinfoQuery::ScreenDepth(p) => tk.screen_depth(win(tk, &p)?)?.to_string(),
            WinfoQuery::ScreenHeight(p) => tk.screen_metrics(win(tk, &p)?)?.1.to_string(),
            WinfoQuery::ScreenMmHeight(p) => tk.screen_metrics(win(tk, &p)?)?.3.to_string(),
            WinfoQuery::ScreenMmWidth(p) => tk.screen_metrics(win(tk, &p)?)?.2.to_string(),
            WinfoQuery::ScreenWidth(p) => tk.screen_metrics(win(tk, &p)?)?.0.to_string(),
            WinfoQuery::Toplevel(p) => {
                let top = tk.toplevel(win(tk, &p)?)?;
                tk.registry.path(top)
            }
            WinfoQuery::Viewable(p) => flag(tk.is_viewable(win(tk, &p)?)?),
            WinfoQuery::VRootHeight(p) => tk.vroot_geometry(win(tk, &p)?)?.height.to_string(),
            WinfoQuery::VRootWidth(p) => tk.vroot_geometry(win(tk, &p)?)?.width.to_string(),
            WinfoQuery::VRootX(p) => tk.vroot_geometry(win(tk, &p)?)?.x.to_string(),
            WinfoQuery::VRootY(p) => tk.vroot_geometry(win(tk, &p)?)?.y.to_string(),
            WinfoQuery::Width(p) => tk.window_geometry(win(tk, &p)?)?.width.to_string(),
            WinfoQuery::X(p) => tk.window_geometry(win(tk, &p)?)?.x.to_string(),
            WinfoQuery::Y(p) => tk.window_geometry(win(tk, &p)?)?.y.to_string(),
        })
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Wm(WmCommand),
    Grab(GrabCommand),
    Winfo(WinfoQuery),
    Send { async_: bool, target: String, script: String },
    Toplevel { path: String, screen: Option<usize>, class: Option<String> },
    Frame { path: String, width: Option<i32>, height: Option<i32>, class: Option<String> },
    Destroy(Vec<String>),
    Raise { path: String, above: Option<String> },
    Lower { path: String, below: Option<String> },
    Update { idle_only: bool },
    AppName(Option<String>),
    Set { name: String, value: Option<String> },
    Error { message: String, info: Option<String>, code: Option<String> },
    GeometryRequest { path: String, width: i32, height: i32 },
}

impl Command {
    pub fn parse(argv: &[String]) -> Result<Self, ScriptError> {
        let Some(name) = argv.first() else {
            return Err(ScriptError::new("empty command"));
        };
        let args = &argv[1..];
        Ok(match name.as_str() {
            "wm" => Command::Wm(WmCommand::parse(argv)?),
            "grab" => Command::Grab(GrabCommand::parse(argv)?),
            "winfo" => Command::Winfo(WinfoQuery::parse(argv)?),
            "send" => {
                let usage = "send ?-option value ...? interpName arg ?arg ...?";
                let mut async_ = false;
                let mut i = 0;
                while let Some(a) = args.get(i).filter(|a| a.starts_with('-')) {
                    match a.as_str() {
                        "-async" => i += 1,
                        "-displayof" => i += 2,
                        "--" => {
                            i += 1;
                            break;
                        }
                        other => return Err(bad_option("option", other, &["-async", "-displayof", "--"])),
                    }
                    async_ |= a == "-async";
                }
                let rest = args.get(i..).unwrap_or_default();
                let [target, script @ ..] = rest else {
                    return Err(wrong_args(usage));
                };
                if script.is_empty() {
                    return Err(wrong_args(usage));
                }
                Command::Send {
                    async_,
                    target: target.clone(),
                    script: script.join(" "),
                }
            }
            "toplevel" => {
                let Some(path) = args.first() else {
                    return Err(wrong_args("toplevel pathName ?-option value ...?"));
                };
                let mut screen = None;
                let mut class = None;
                for (opt, value) in options(&args[1..], "toplevel pathName ?-option value ...?")? {
                    match opt {
                        "-screen" => {
                            screen = Some(
                                value
                                    .rsplit_once('.')
                                    .map_or(Some(0), |(_, n)| n.parse().ok())
                                    .ok_or_else(|| ScriptError::new(format!("bad screen number \"{}\"", value)))?,
                            )
                        }
                        "-class" => class = Some(value.to_string()),
                        other => return Err(ScriptError::new(format!("unknown option \"{}\"", other))),
                    }
                }
                Command::Toplevel {
                    path: path.clone(),
                    screen,
                    class,
                }
            }
            "frame" => {
                let Some(path) = args.first() else {
                    return Err(wrong_args("frame pathName ?-option value ...?"));
                };
                let (mut width, mut height, mut class) = (None, None, None);
                for (opt, value) in options(&args[1..], "frame pathName ?-option value ...?")? {
                    match opt {
                        "-width" => width = Some(int(value)?),
                        "-height" => height = Some(int(value)?),
                        "-class" => class = Some(value.to_string()),
                        other => return Err(ScriptError::new(format!("unknown option \"{}\"", other))),
                    }
                }
                Command::Frame {
                    path: path.clone(),
                    width,
                    height,
                    class,
                }
            }
            "destroy" => Command::Destroy(args.to_vec()),
            "raise" | "lower" => {
                let (path, other) = match args {
                    [p] => (p.clone(), None),
                    [p, o] => (p.clone(), Some(o.clone())),
                    _ => {
                        return Err(wrong_args(if name == "raise" {
                            "raise window ?aboveThis?"
                        } else {
                            "lower window ?belowThis?"
                        }))
                    }
                };
                if name == "raise" {
                    Command::Raise { path, above: other }
                } else {
                    Command::Lower { path, below: other }
                }
            }
            "update" => match args {
                [] => Command::Update { idle_only: false },
                [a] if a == "idletasks" => Command::Update { idle_only: true },
                [a] => return Err(bad_option("option", a, &["idletasks"])),
                _ => return Err(wrong_args("update ?idletasks?")),
            },
            "tk" => match args {
                [sub] if sub == "appname" => Command::AppName(None),
                [sub, n] if sub == "appname" => Command::AppName(Some(n.clone())),
                [sub, ..] if sub == "appname" => return Err(wrong_args("tk appname ?newName?")),
                [sub, ..] => return Err(bad_option("option", sub, &["appname"])),
                [] => return Err(wrong_args("tk option ?arg?")),
            },
            "set" => match args {
                [n] => Command::Set {
                    name: n.clone(),
                    value: None,
                },
                [n, v] => Command::Set {
                    name: n.clone(),
                    value: Some(v.clone()),
                },
                _ => return Err(wrong_args("set varName ?newValue?")),
            },
            "error" => match args {
                [m, rest @ ..] if rest.len() <= 2 => Command::Error {
                    message: m.clone(),
                    info: rest.first().filter(|i| !i.is_empty()).cloned(),
                    code: rest.get(1).cloned(),
                },
                _ => return Err(wrong_args("error message ?errorInfo? ?errorCode?")),
            },
            "geometry-request" => match args {
                [p, w, h] => Command::GeometryRequest {
                    path: p.clone(),
                    width: int(w)?,
                    height: int(h)?,
                },
                _ => return Err(wrong_args("geometry-request window width height")),
            },
            other => return Err(ScriptError::new(format!("invalid command name \"{}\"", other))),
        })
    }
}

/// The built-in interpreter of an application
pub struct CommandInterp {
    app: AppId,
    vars: RefCell<HashMap<String, String>>,
}

impl CommandInterp {
    pub fn new(app: AppId) -> Self {
        Self {
            app,
            vars: RefCell::new(HashMap::new()),
        }
    }

    pub fn var(&self, name: &str) -> Option<String> {
        self.vars.borrow().get(name).cloned()
    }

    fn interp_id(&self, tk: &Toolkit) -> Option<InterpId> {
        tk.registry.apps.get(self.app)?.interp
    }

    fn substitute(&self, tk: &mut Toolkit, word: &Word) -> Outcome {
        let mut out = String::new();
        for part in word {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Var(name) => {
                    let value = self
                        .var(name)
                        .ok_or_else(|| ScriptError::new(format!("can't read \"{}\": no such variable", name)))?;
                    out.push_str(&value);
                }
                Part::Command(script) => out.push_str(&self.eval(tk, script)?),
            }
        }
        Ok(out)
    }

    fn execute(&self, tk: &mut Toolkit, command: Command) -> Outcome {
        let app = self.app;
        let win = |tk: &Toolkit, path: &str| tk.window_by_path(app, path).map_err(ScriptError::from);
        match command {
            Command::Wm(wm) => wm.run(tk, app),
            Command::Grab(grab) => grab.run(tk, app),
            Command::Winfo(query) => query.run(tk, app),
            Command::Send { async_, target, script } => {
                let from = self.interp_id(tk).ok_or(XtkError::AppDestroyed)?;
                tk.send(from, &target, &script, async_)
            }
            Command::Toplevel { path, screen, class } => {
                let (parent, name) = split_path(&path)?;
                let parent = win(tk, parent)?;
                let top = tk.new_toplevel(parent, name, screen)?;
                tk.set_window_class(top, class.as_deref().unwrap_or("Toplevel"))?;
                tk.idle.push_back(IdleTask::MapToplevel(top));
                Ok(path)
            }
            Command::Frame {
                path,
                width,
                height,
                class,
            } => {
                let (parent, name) = split_path(&path)?;
                let parent = win(tk, parent)?;
                let frame = tk.create_window(parent, name)?;
                tk.set_window_class(frame, class.as_deref().unwrap_or("Frame"))?;
                if width.is_some() || height.is_some() {
                    let rec = &tk.registry.windows[frame];
                    let (w, h) = (width.unwrap_or(rec.req_width), height.unwrap_or(rec.req_height));
                    tk.geometry_request(frame, w, h)?;
                    tk.move_resize_window(frame, 0, 0, w, h)?;
                }
                if tk.is_connected(tk.registry.windows[frame].display) {
                    tk.map_window(frame)?;
                }
                Ok(path)
            }
            Command::Destroy(paths) => {
                for path in paths {
                    if let Some(w) = tk.registry.lookup(app, &path) {
                        tk.destroy_window(w)?;
                    }
                    if !tk.registry.apps.get(app).is_some_and(|a| a.alive) {
                        break;
                    }
                }
                Ok(String::new())
            }
            Command::Raise { path, above } => {
                let w = win(tk, &path)?;
                let above = above.map(|a| win(tk, &a)).transpose()?;
                tk.raise(w, above)?;
                Ok(String::new())
            }
            Command::Lower { path, below } => {
                let w = win(tk, &path)?;
                let below = below.map(|b| win(tk, &b)).transpose()?;
                tk.lower(w, below)?;
                Ok(String::new())
            }
            Command::Update { idle_only } => {
                if idle_only {
                    while tk.run_idle()? {}
                } else {
                    tk.update()?;
                }
                Ok(String::new())
            }
            Command::AppName(name) => {
                let interp = self.interp_id(tk).ok_or(XtkError::AppDestroyed)?;
                match name {
                    Some(name) => Ok(tk.set_app_name(interp, &name)?),
                    None => {
                        let main = tk
                            .registry
                            .apps
                            .get(app)
                            .and_then(|a| a.main_window)
                            .ok_or(XtkError::AppDestroyed)?;
                        Ok(tk.window_name(main)?)
                    }
                }
            }
            Command::Set { name, value } => match value {
                Some(value) => {
                    self.vars.borrow_mut().insert(name, value.clone());
                    Ok(value)
                }
                None => self
                    .var(&name)
                    .ok_or_else(|| ScriptError::new(format!("can't read \"{}\": no such variable", name))),
            },
            Command::Error { message, info, code } => {
                let mut err = ScriptError::new(message);
                err.error_info = info;
                err.error_code = code;
                Err(err)
            }
            Command::GeometryRequest { path, width, height } => {
                tk.geometry_request(win(tk, &path)?, width, height)?;
                Ok(String::new())
            }
        }
    }
}

impl Interp for CommandInterp {
    fn eval(&self, tk: &mut Toolkit, script: &str) -> Result<String, ScriptError> {
        let commands = words::parse_script(script).map_err(|e| ScriptError::new(e.to_string()))?;
        let mut result = String::new();
        for words in commands {
            if !tk.registry.apps.get(self.app).is_some_and(|a| a.alive) {
                return Err(XtkError::AppDestroyed.into());
            }
            let mut argv = Vec::with_capacity(words.len());
            for word in &words {
                argv.push(self.substitute(tk, word)?);
            }
            result = Command::parse(&argv)
                .and_then(|command| self.execute(tk, command))
                .map_err(|mut e| {
                    if e.error_info.is_none() {
                        e.error_info = Some(format!(
                            "{}\n    while executing\n\"{}\"",
                            e.message,
                            words::join(&argv)
                        ));
                    }
                    e
                })?;
        }
        Ok(result)
    }
}
