// Not all helpers are used by every test binary.
#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Once;

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Drives `root` on a fresh default runtime.
pub fn run<F>(root: F) -> F::Output
where
    F: Future + 'static,
    F::Output: 'static,
{
    init();
    netio::run(root).expect("runtime failure")
}

/// A temp-directory path unique to this test process.
pub fn temp_file(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("netio_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}
