//! Integration tests for xtk using Xvfb.
//!
//! These tests require:
//! - Xvfb (headless X server)
//! - The xtkctl binary, which cargo builds for integration tests
//!
//! Run with: RUST_LOG=info cargo test --test integration
//!
//! If Xvfb is not available, tests will be skipped.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use xtk::error::SendError;
use xtk::{CommandInterp, Config, InterpId, Toolkit, XtkError};

static NEXT_DISPLAY: AtomicU32 = AtomicU32::new(0);

/// Check if Xvfb is available
fn xvfb_available() -> bool {
    Command::new("which")
        .arg("Xvfb")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Test fixture that manages an Xvfb server and the `xtkctl serve`
/// applications started on it
struct TestHarness {
    xvfb: Child,
    servers: Vec<Child>,
    display: String,
    config_home: PathBuf,
}

impl TestHarness {
    /// Start a fresh Xvfb; each test gets its own display number
    fn new() -> Option<Self> {
        if !xvfb_available() {
            eprintln!("Xvfb not available, skipping integration tests");
            return None;
        }

        let number = 140 + (std::process::id() % 200) * 4 + NEXT_DISPLAY.fetch_add(1, Ordering::SeqCst);
        let display = format!(":{}", number);

        let xvfb = match Command::new("Xvfb")
            .args([display.as_str(), "-screen", "0", "1280x800x24", "-nolisten", "tcp"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                eprintln!("Failed to start Xvfb: {}", e);
                return None;
            }
        };

        // Wait for Xvfb to be ready
        std::thread::sleep(Duration::from_millis(500));

        // Child processes read their config from here; sends between test
        // processes must not depend on the server's access list
        let config_home = std::env::temp_dir().join(format!("xtk-test-{}", number));
        let xtk_dir = config_home.join("xtk");
        if std::fs::create_dir_all(&xtk_dir).is_err()
            || std::fs::write(xtk_dir.join("config.toml"), "[send]\nallow_insecure = true\n").is_err()
        {
            eprintln!("Failed to write test config under {:?}", config_home);
            return None;
        }

        Some(Self {
            xvfb,
            servers: Vec::new(),
            display,
            config_home,
        })
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.send.allow_insecure = true;
        config
    }

    /// Start `xtkctl serve` and return the name it registered under
    fn serve(&mut self, name: &str, extra: &[&str]) -> Option<String> {
        let mut child = Command::new(env!("CARGO_BIN_EXE_xtkctl"))
            .args(["serve", "--name", name])
            .args(extra)
            .env("DISPLAY", &self.display)
            .env("XDG_CONFIG_HOME", &self.config_home)
            .env("RUST_LOG", "info")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;
        let stdout = child.stdout.take()?;
        self.servers.push(child);
        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line).ok()?;
        let actual = line.trim().to_string();
        (!actual.is_empty()).then_some(actual)
    }

    /// In-process toolkit with one application and interpreter
    fn client(&self) -> (Toolkit, InterpId) {
        let mut tk = Toolkit::new(self.config());
        let display = tk.open_display(Some(&self.display)).expect("open display");
        let (app, _) = tk.create_app(display, "Client").expect("create app");
        let interp = tk.add_interp(app, Rc::new(CommandInterp::new(app)));
        (tk, interp)
    }

    /// Run `xtkctl` to completion
    fn ctl(&self, args: &[&str]) -> std::process::Output {
        Command::new(env!("CARGO_BIN_EXE_xtkctl"))
            .args(args)
            .env("DISPLAY", &self.display)
            .env("XDG_CONFIG_HOME", &self.config_home)
            .output()
            .expect("run xtkctl")
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        for server in &mut self.servers {
            let _ = server.kill();
            let _ = server.wait();
        }
        let _ = self.xvfb.kill();
        let _ = self.xvfb.wait();
        let _ = std::fs::remove_dir_all(&self.config_home);
    }
}

#[test]
fn test_names_are_made_unique_across_processes() {
    let Some(mut h) = TestHarness::new() else { return };
    assert_eq!(h.serve("demo", &[]).as_deref(), Some("demo"));
    assert_eq!(h.serve("demo", &[]).as_deref(), Some("demo #2"));

    let (tk, interp) = h.client();
    let display = tk.registry.apps[tk.interp_app(interp).unwrap()].display;
    let mut names = tk.interps(display).unwrap();
    names.sort();
    assert_eq!(names, vec!["demo".to_string(), "demo #2".to_string()]);
}

#[test]
fn test_remote_send_round_trip() {
    let Some(mut h) = TestHarness::new() else { return };
    let name = h.serve("remote", &[]).expect("server started");
    let (mut tk, interp) = h.client();

    assert_eq!(tk.send(interp, &name, "winfo class .", false).unwrap(), "Xtk");
    assert_eq!(tk.send(interp, &name, "set greeting hello", false).unwrap(), "hello");
    tk.send(interp, &name, "set later [set greeting]", true).unwrap();
    assert_eq!(tk.send(interp, &name, "set later", false).unwrap(), "hello");

    let err = tk.send(interp, &name, "error boom {} {REMOTE CODE}", false).unwrap_err();
    assert_eq!(err.message, "boom");
    assert_eq!(err.error_code.as_deref(), Some("REMOTE CODE"));
    assert!(err.trace().contains("invoked from within\n\"send remote"));
}

#[test]
fn test_send_to_unknown_application() {
    let Some(h) = TestHarness::new() else { return };
    let (mut tk, interp) = h.client();
    let err = tk.send(interp, "nobody", "winfo name .", false).unwrap_err();
    let expected: xtk::ScriptError = XtkError::from(SendError::NoApplication("nobody".into())).into();
    assert_eq!(err.message, expected.message);
    assert_eq!(err.error_code.as_deref(), Some("TK SEND"));
}

#[test]
fn test_remote_geometry_and_title() {
    let Some(mut h) = TestHarness::new() else { return };
    let name = h
        .serve("geom", &["--geometry", "300x200+40+50", "--title", "Geometry test"])
        .expect("server started");
    let (mut tk, interp) = h.client();

    assert_eq!(tk.send(interp, &name, "wm title .", false).unwrap(), "Geometry test");
    assert_eq!(tk.send(interp, &name, "wm geometry .", false).unwrap(), "300x200+40+50");
    tk.send(interp, &name, "wm geometry . 250x120; update", false).unwrap();
    let geometry = tk.send(interp, &name, "winfo geometry .", false).unwrap();
    assert!(geometry.starts_with("250x120"), "got {}", geometry);
    assert_eq!(tk.send(interp, &name, "winfo ismapped .", false).unwrap(), "1");
}

#[test]
fn test_remote_gridded_toplevel() {
    let Some(mut h) = TestHarness::new() else { return };
    let name = h.serve("grid", &[]).expect("server started");
    let (mut tk, interp) = h.client();

    tk.send(
        interp,
        &name,
        "toplevel .t; geometry-request .t 50 50; wm grid .t 5 5 10 10; wm geometry .t 8x8; update",
        false,
    )
    .unwrap();
    tk.send(interp, &name, "update", false).unwrap();
    let geometry = tk.send(interp, &name, "winfo geometry .t", false).unwrap();
    assert!(geometry.starts_with("80x80"), "got {}", geometry);
    let reported = tk.send(interp, &name, "wm geometry .t", false).unwrap();
    assert!(reported.starts_with("8x8+"), "got {}", reported);
}

#[test]
fn test_local_window_geometry() {
    let Some(h) = TestHarness::new() else { return };
    let mut tk = Toolkit::new(h.config());
    let display = tk.open_display(Some(&h.display)).unwrap();
    let (_, main) = tk.create_app(display, "Local").unwrap();
    tk.set_geometry(main, "200x100+30+40").unwrap();
    tk.map_window(main).unwrap();
    tk.update().unwrap();

    assert_eq!(tk.geometry(main).unwrap(), "200x100+30+40");
    let geometry = tk.window_geometry(main).unwrap();
    assert_eq!((geometry.width, geometry.height), (200, 100));
    assert!(tk.is_mapped(main).unwrap());
    assert_eq!(tk.wm_state_name(main).unwrap(), "normal");
}

#[test]
fn test_ctl_lists_and_sends() {
    let Some(mut h) = TestHarness::new() else { return };
    let name = h.serve("ctl", &[]).expect("server started");

    let out = h.ctl(&["interps", "--json"]);
    assert!(out.status.success());
    let names: Vec<String> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(names, vec![name.clone()]);

    let out = h.ctl(&["send", &name, "winfo", "name", "."]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "ctl");

    let out = h.ctl(&["send", "missing", "winfo", "name", "."]);
    assert!(!out.status.success());
}
