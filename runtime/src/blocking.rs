//! Driving async handlers and repositories from blocking pipeline calls.
//!
//! The blocking mode ([`MessagePipeline::process`](crate::MessagePipeline::process))
//! still has to await async handlers and repository writes, and those are
//! usually Tokio-backed (timers, sqlx connections). A [`BlockingDriver`] runs
//! such futures inside a Tokio context:
//!
//! 1. on a multi-thread runtime worker, through `block_in_place`;
//! 2. outside any runtime, on the runtime captured when the driver was built;
//! 3. otherwise on a shared single-worker runtime started on first use.
//!
//! Blocking calls made from a current-thread runtime cannot be served and
//! fail with a configuration error; use the async entry points there.

use courier_core::error::PipelineError;
use std::future::Future;
use std::sync::OnceLock;
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

/// Runs futures to completion on behalf of blocking callers.
#[derive(Debug, Clone, Default)]
pub struct BlockingDriver {
    handle: Option<Handle>,
}

impl BlockingDriver {
    /// Driver bound to the runtime of the calling context, if there is one.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    /// Driver bound to `handle`.
    #[must_use]
    pub const fn with_handle(handle: Handle) -> Self {
        Self { handle: Some(handle) }
    }

    /// The captured runtime handle.
    #[must_use]
    pub const fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }

    /// Block the calling thread until `future` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] when called from a
    /// current-thread runtime or when the shared runtime cannot start.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, PipelineError> {
        if let Ok(current) = Handle::try_current() {
            return match current.runtime_flavor() {
                RuntimeFlavor::CurrentThread => Err(PipelineError::Configuration(
                    "blocking pipeline call on a current-thread Tokio runtime; use the async entry points".into(),
                )),
                _ => Ok(tokio::task::block_in_place(|| current.block_on(future))),
            };
        }
        if let Some(handle) = &self.handle {
            return Ok(handle.block_on(future));
        }
        Ok(shared_runtime()?.block_on(future))
    }
}

fn shared_runtime() -> Result<&'static Runtime, PipelineError> {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("courier-blocking")
        .enable_all()
        .build()
        .map_err(|error| PipelineError::Configuration(format!("cannot start the blocking runtime: {error}")))?;
    tracing::debug!("Started shared runtime for blocking pipeline calls");
    Ok(RUNTIME.get_or_init(|| runtime))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on driver errors
mod tests {
    use super::*;
    use courier_core::error::ErrorKind;
    use std::time::Duration;

    async fn tick() -> u32 {
        tokio::time::sleep(Duration::from_millis(1)).await;
        7
    }

    #[test]
    fn drives_timers_without_an_ambient_runtime() {
        let driver = BlockingDriver::new();
        assert!(driver.handle().is_none());
        assert_eq!(driver.block_on(tick()).unwrap(), 7);
    }

    #[test]
    fn uses_the_captured_runtime_from_a_plain_thread() {
        let runtime = Builder::new_multi_thread().worker_threads(1).enable_all().build().unwrap();
        let driver = BlockingDriver::with_handle(runtime.handle().clone());

        let value = std::thread::spawn(move || driver.block_on(tick()).unwrap())
            .join()
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocks_in_place_on_a_multi_thread_worker() {
        assert_eq!(BlockingDriver::new().block_on(tick()).unwrap(), 7);
    }

    #[tokio::test]
    async fn refuses_a_current_thread_runtime() {
        let error = BlockingDriver::new().block_on(tick()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }
}
