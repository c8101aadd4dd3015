//! C ABI for embedding the rns engine in an editor.
//!
//! The editor calls `rns_init` once with a command executor, then drives the
//! engine through the exported functions declared in `include/rns.h`.
//!
//! ```text
//! ┌──────────┐  nvim_* / plugin_* / rns_*   ┌──────────────┐
//! │  Editor  │ ───────────────────────────► │ ConfigEngine │
//! │          │ ◄─────────────────────────── │ ExCommandHost│
//! └──────────┘   executor("set number")     └──────────────┘
//! ```
//!
//! Every export returns 0 on success or the ordinal of an `ErrorKind`. The
//! outcome of the last call is kept as JSON and can be fetched with
//! `rns_last_report`: its batch report, its error, or `{"ok":true}`.

pub mod exports;
pub mod host;
mod logging;
pub mod lua_module;

#[cfg(test)]
pub(crate) mod testing;

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use parking_lot::Mutex;
use rns_core::{ConfigError, EngineError, ErrorKind};
use rns_engine::{ApplyReport, ConfigEngine, LifecycleReport, LoadReport};
use serde::Serialize;
use thiserror::Error;

pub use host::{CommandExecutor, CommandSink, ExCommandHost, LuaCommandSink};
pub use lua_module::SharedEngine;
pub use logging::{init_tracing, LOG_ENV};

/// The engine owned by the library. `None` until `rns_init`.
static ENGINE: Mutex<Option<ConfigEngine>> = parking_lot::const_mutex(None);

/// JSON of the most recent report or error.
static LAST_REPORT: Mutex<Option<String>> = parking_lot::const_mutex(None);

/// Failures crossing the C boundary.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type AbiResult<T> = Result<T, AbiError>;

impl AbiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AbiError::Engine(EngineError::InvalidArgument(message.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AbiError::Engine(e) => e.kind(),
            AbiError::Config(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Record the error as the last report and return its status.
    fn into_status(self) -> c_int {
        let kind = self.kind();
        tracing::warn!("rns call failed: {}", self);
        store_report(&serde_json::json!({
            "error": { "kind": kind, "code": kind.ordinal(), "message": self.to_string() }
        }));
        kind.ordinal()
    }
}

/// Reports that map onto a single status code.
pub trait Status {
    fn status(&self) -> c_int;
}

impl Status for ApplyReport {
    fn status(&self) -> c_int {
        if self.is_success() {
            0
        } else {
            ErrorKind::PrimitiveApplyFailure.ordinal()
        }
    }
}

impl Status for LifecycleReport {
    fn status(&self) -> c_int {
        if !self.failed.is_empty() {
            ErrorKind::ExternalFetchFailure.ordinal()
        } else {
            self.post_install.as_ref().map_or(0, Status::status)
        }
    }
}

impl Status for LoadReport {
    fn status(&self) -> c_int {
        if self.is_success() {
            0
        } else {
            ErrorKind::PrimitiveApplyFailure.ordinal()
        }
    }
}

/// Run `f` against the engine and turn its outcome into a status code.
///
/// The last report is reset to `{"ok":true}` first, so a call that neither
/// fails nor produces a report never leaves an older one behind.
pub(crate) fn with_engine<F>(f: F) -> c_int
where
    F: FnOnce(&mut ConfigEngine) -> AbiResult<c_int>,
{
    let mut guard = ENGINE.lock();
    let Some(engine) = guard.as_mut() else {
        return AbiError::Engine(EngineError::NotInitialized).into_status();
    };
    store_ok();
    match f(engine) {
        Ok(status) => status,
        Err(err) => err.into_status(),
    }
}

/// Like `with_engine` for calls producing a report: the report becomes the
/// last report and decides the status.
pub(crate) fn with_report<R, F>(f: F) -> c_int
where
    R: Serialize + Status,
    F: FnOnce(&mut ConfigEngine) -> AbiResult<R>,
{
    with_engine(|engine| {
        let report = f(engine)?;
        store_report(&report);
        Ok(report.status())
    })
}

pub(crate) fn install_engine(engine: Option<ConfigEngine>) {
    *ENGINE.lock() = engine;
}

pub(crate) fn store_report<T: Serialize>(report: &T) {
    match serde_json::to_string(report) {
        Ok(json) => *LAST_REPORT.lock() = Some(json),
        Err(e) => tracing::warn!("Failed to serialize report: {}", e),
    }
}

pub(crate) fn store_ok() {
    store_report(&serde_json::json!({ "ok": true }));
}

pub(crate) fn last_report() -> Option<String> {
    LAST_REPORT.lock().clone()
}

// ============================================================================
// Argument marshaling
// ============================================================================

/// Borrow a required string argument.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> AbiResult<&'a str> {
    if ptr.is_null() {
        return Err(AbiError::invalid(format!("{} must not be null", name)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| AbiError::invalid(format!("{} is not valid UTF-8", name)))
}

/// Borrow an optional string argument. Null and empty strings are `None`.
///
/// # Safety
/// Same contract as `str_arg`.
pub(crate) unsafe fn opt_str_arg<'a>(ptr: *const c_char, name: &str) -> AbiResult<Option<&'a str>> {
    if ptr.is_null() {
        return Ok(None);
    }
    let s = str_arg(ptr, name)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_lifecycle_status() {
        let mut report = LifecycleReport::default();
        assert_eq!(report.status(), 0);

        let mut post = ApplyReport::empty();
        post.failed.push(rns_engine::FailedOperation {
            id: rns_core::OperationId {
                index: 0,
                stage: rns_core::Stage::Exec,
                origin: rns_core::Origin::Lifecycle,
                key: "exec:packloadall".into(),
            },
            kind: ErrorKind::PrimitiveApplyFailure,
            message: "rejected".into(),
        });
        report.post_install = Some(post);
        assert_eq!(report.status(), 11);

        report.failed.push(rns_engine::LifecycleFailure {
            plugin: "telescope".into(),
            kind: ErrorKind::ExternalFetchFailure,
            message: "repository not found".into(),
        });
        assert_eq!(report.status(), 10);
    }

    #[test]
    fn test_string_arguments() {
        let value = CString::new("number").unwrap();
        let empty = CString::new("").unwrap();

        unsafe {
            assert_eq!(str_arg(value.as_ptr(), "name").unwrap(), "number");
            assert_eq!(opt_str_arg(empty.as_ptr(), "group").unwrap(), None);
            assert_eq!(opt_str_arg(std::ptr::null(), "group").unwrap(), None);

            let err = str_arg(std::ptr::null(), "name").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }
}
