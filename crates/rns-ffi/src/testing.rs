//! Shared test scaffolding. Every export drives the one library-wide
//! engine, so tests touching it hold `SERIAL`.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::exports::{rns_free_string, rns_init, rns_last_report};

pub static SERIAL: Mutex<()> = parking_lot::const_mutex(());
static EXECUTED: Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());

/// Executor recording every command. Commands mentioning "bogus" fail.
pub extern "C" fn record(command: *const c_char) -> c_int {
    let command = unsafe { CStr::from_ptr(command) }.to_string_lossy().into_owned();
    let status = if command.contains("bogus") { 1 } else { 0 };
    EXECUTED.lock().push(command);
    status
}

pub fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

/// Drain the commands recorded so far.
pub fn executed() -> Vec<String> {
    std::mem::take(&mut *EXECUTED.lock())
}

/// Config file with an install dir under `dir` and logging off.
pub fn write_config(dir: &TempDir) -> PathBuf {
    let install_dir = dir.path().join("pack");
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "install_dir = '{}'\npost_install = []\n\n[log]\nfilter = 'off'\n",
            install_dir.display()
        ),
    )
    .unwrap();
    config
}

/// Fresh engine through `rns_init`, using the recording executor.
pub fn init() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let path = c(write_config(&dir).to_str().unwrap());
    assert_eq!(unsafe { rns_init(Some(record), path.as_ptr()) }, 0);
    executed();
    dir
}

pub fn report() -> serde_json::Value {
    let ptr = rns_last_report();
    assert!(!ptr.is_null());
    let json = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
    unsafe { rns_free_string(ptr) };
    serde_json::from_str(&json).unwrap()
}
