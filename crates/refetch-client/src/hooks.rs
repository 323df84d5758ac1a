//! Request lifecycle hooks.

use std::sync::Arc;

/// Interception points around every HTTP attempt.
///
/// Hooks run once per attempt, so a retried request passes through
/// `before_request` again.
pub trait RequestHook: Send + Sync {
    /// Inspect or modify the outgoing request.
    fn before_request(&self, _request: &mut reqwest::Request) {}

    /// Observe the response before its body is read.
    fn after_response(&self, _response: &reqwest::Response) {}
}

/// Ordered hook list.
#[derive(Clone, Default)]
pub struct Hooks(Vec<Arc<dyn RequestHook>>);

impl Hooks {
    /// Append a hook.
    pub fn push(&mut self, hook: Arc<dyn RequestHook>) {
        self.0.push(hook);
    }

    pub(crate) fn before_request(&self, request: &mut reqwest::Request) {
        for hook in &self.0 {
            hook.before_request(request);
        }
    }

    pub(crate) fn after_response(&self, response: &reqwest::Response) {
        for hook in &self.0 {
            hook.after_response(response);
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Hooks").field(&self.0.len()).finish()
    }
}
