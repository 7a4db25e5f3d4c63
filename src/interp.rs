//! Script interpreters attached to applications.
//!
//! The toolkit does not implement a language; hosts plug one in through
//! [`Interp`]. Interpreters are held as `Rc<dyn Interp>` so a script can be
//! re-entered while it is running (a send to itself, a protocol handler that
//! sends).

use std::fmt;
use std::rc::Rc;

use slotmap::new_key_type;

use crate::error::XtkError;
use crate::registry::{AppId, DisplayId};
use crate::toolkit::Toolkit;

new_key_type! {
    pub struct InterpId;
}

/// Completion codes of script evaluation
pub const CODE_OK: i32 = 0;
pub const CODE_ERROR: i32 = 1;

/// A failed evaluation: message plus the error trace and machine-readable
/// error code of the interpreter that raised it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub message: String,
    pub code: i32,
    pub error_info: Option<String>,
    pub error_code: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: CODE_ERROR,
            error_info: None,
            error_code: None,
        }
    }

    pub fn with_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = Some(error_code.into());
        self
    }

    /// Trace to report, falling back to the message itself
    pub fn trace(&self) -> &str {
        self.error_info.as_deref().unwrap_or(&self.message)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScriptError {}

impl From<XtkError> for ScriptError {
    fn from(e: XtkError) -> Self {
        let code = match &e {
            XtkError::Send(_) => Some("TK SEND"),
            XtkError::Grab(_) => Some("TK GRAB"),
            XtkError::Wm(_) => Some("TK WM"),
            XtkError::Canceled => Some("TCL CANCEL"),
            _ => None,
        };
        let mut err = ScriptError::new(e.to_string());
        err.error_code = code.map(str::to_string);
        err
    }
}

/// A script interpreter
pub trait Interp {
    fn eval(&self, tk: &mut Toolkit, script: &str) -> Result<String, ScriptError>;
}

/// An interpreter known to the toolkit
pub struct InterpRecord {
    pub interp: Rc<dyn Interp>,
    pub app: AppId,
    pub display: DisplayId,
    /// Name registered for send, if any
    pub send_name: Option<String>,
}

impl Toolkit {
    /// Attach an interpreter to an application
    pub fn add_interp(&mut self, app: AppId, interp: Rc<dyn Interp>) -> InterpId {
        let display = self.registry.apps[app].display;
        let id = self.interps.insert(InterpRecord {
            interp,
            app,
            display,
            send_name: None,
        });
        self.registry.apps[app].interp = Some(id);
        id
    }

    /// Evaluate `script` in an interpreter
    pub fn eval(&mut self, id: InterpId, script: &str) -> Result<String, ScriptError> {
        let Some(rec) = self.interps.get(id) else {
            return Err(XtkError::AppDestroyed.into());
        };
        let interp = Rc::clone(&rec.interp);
        interp.eval(self, script)
    }

    /// Detach an interpreter, dropping its send registration
    pub fn delete_interp(&mut self, id: InterpId) -> crate::error::Result<()> {
        let result = self.unregister(id);
        self.forget_retired(id);
        if let Some(rec) = self.interps.remove(id) {
            if let Some(app) = self.registry.apps.get_mut(rec.app) {
                if app.interp == Some(id) {
                    app.interp = None;
                }
            }
        }
        result
    }

    pub fn interp_app(&self, id: InterpId) -> Option<AppId> {
        self.interps.get(id).map(|r| r.app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendError;

    #[test]
    fn test_script_error_from_send_error() {
        let err: ScriptError = XtkError::from(SendError::NoApplication("foo".into())).into();
        assert_eq!(err.message, "no application named \"foo\"");
        assert_eq!(err.code, CODE_ERROR);
        assert_eq!(err.error_code.as_deref(), Some("TK SEND"));
        assert_eq!(err.trace(), err.message);
    }

    #[test]
    fn test_trace_prefers_error_info() {
        let mut err = ScriptError::new("boom");
        err.error_info = Some("boom\n    while executing\n\"error boom\"".into());
        assert!(err.trace().contains("while executing"));
    }

    struct Constant(&'static str);

    impl Interp for Constant {
        fn eval(&self, _tk: &mut Toolkit, _script: &str) -> Result<String, ScriptError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_delete_interp_detaches_it() {
        let (mut tk, _, app, _) = crate::toolkit::tests::detached();
        let id = tk.add_interp(app, Rc::new(Constant("ok")));
        assert_eq!(tk.eval(id, "anything").unwrap(), "ok");
        assert_eq!(tk.interp_app(id), Some(app));
        tk.register(id, "const").unwrap();
        tk.delete_interp(id).unwrap();
        assert_eq!(tk.registry.apps[app].interp, None);
        assert_eq!(tk.interp_app(id), None);
        let err = tk.eval(id, "anything").unwrap_err();
        assert_eq!(err.message, "application has been destroyed");
    }
}
