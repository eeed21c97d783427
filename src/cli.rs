//! Shared start-up and exit handling of the command-line tools.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::io::object_from_json;

pub const EXIT_SUCCESS: i32 = 0;
/// The tool ran and reported an error.
pub const EXIT_FAILURE: i32 = -1;
/// The tool stopped on a panic.
pub const EXIT_UNKNOWN: i32 = -2;

pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Maps the outcome of `body` to a process exit code without exiting.
pub fn exit_code<F>(body: F) -> i32
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => EXIT_SUCCESS,
        Ok(Err(e)) => {
            log::error!("{:#}", e);
            EXIT_FAILURE
        }
        Err(_) => {
            log::error!("stopped on an unexpected failure");
            EXIT_UNKNOWN
        }
    }
}

/// Sets up logging, runs `body` and exits with its code.
pub fn run<F>(body: F) -> !
where
    F: FnOnce() -> anyhow::Result<()>,
{
    init_logger();
    std::process::exit(exit_code(body))
}

/// Config from `path`, or the default when none was given.
pub fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> crate::Result<T> {
    match path {
        Some(p) => object_from_json(p),
        None => Ok(T::default()),
    }
}
