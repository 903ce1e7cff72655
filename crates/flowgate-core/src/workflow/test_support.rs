//! Shared helpers for workflow tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use flowgate_types::config::EngineConfig;

use super::action::{
    ActionContext, ActionError, BoxCommandExecutor, CommandRegistry, InlineAction,
};

/// Held by every test that reads or writes the process environment,
/// including any test that runs a workflow with `environment` overrides.
pub(crate) static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Config with a 1ms backoff base so retry tests stay fast.
pub(crate) fn fast_config() -> EngineConfig {
    EngineConfig {
        backoff_base_ms: 1,
        ..EngineConfig::default()
    }
}

/// A registry-backed command executor.
pub(crate) fn registry() -> (Arc<CommandRegistry>, BoxCommandExecutor) {
    let registry = Arc::new(CommandRegistry::new());
    let executor = BoxCommandExecutor::new(Arc::clone(&registry));
    (registry, executor)
}

/// Counts invocations and succeeds.
pub(crate) fn counting_ok(calls: &Arc<AtomicU32>) -> impl InlineAction + 'static {
    let calls = Arc::clone(calls);
    move |_ctx: ActionContext| {
        calls.fetch_add(1, Ordering::SeqCst);
        futures_util::future::ready(Ok::<(), ActionError>(()))
    }
}

/// Counts invocations and fails.
pub(crate) fn counting_fail(calls: &Arc<AtomicU32>) -> impl InlineAction + 'static {
    let calls = Arc::clone(calls);
    move |_ctx: ActionContext| {
        calls.fetch_add(1, Ordering::SeqCst);
        futures_util::future::ready(Err::<(), _>(ActionError::failed("boom")))
    }
}

/// Fails until it has been called `failures` times, then succeeds.
pub(crate) fn flaky(calls: &Arc<AtomicU32>, failures: u32) -> impl InlineAction + 'static {
    let calls = Arc::clone(calls);
    move |_ctx: ActionContext| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            let error = ActionError::failed(format!("failure #{}", n + 1));
            futures_util::future::ready(Err::<(), _>(error))
        } else {
            futures_util::future::ready(Ok::<(), ActionError>(()))
        }
    }
}

/// Sleeps for `delay`, then succeeds.
pub(crate) fn slow(delay: Duration) -> impl InlineAction + 'static {
    move |_ctx: ActionContext| async move {
        tokio::time::sleep(delay).await;
        Ok::<(), ActionError>(())
    }
}
