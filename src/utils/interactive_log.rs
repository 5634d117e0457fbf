//! Log suppression while an interactive display owns the terminal
//!
//! Progress bars and the player key loop redraw the terminal in place.
//! Log lines written in between would tear the display, so the fmt layer
//! is wrapped in [`QuietWhenInteractive`] and muted while a display runs.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::span;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

static INTERACTIVE: AtomicBool = AtomicBool::new(false);

pub fn set_interactive(enabled: bool) {
    INTERACTIVE.store(enabled, Ordering::SeqCst);
}

pub fn is_interactive() -> bool {
    INTERACTIVE.load(Ordering::SeqCst)
}

/// Mutes logging until dropped
#[must_use]
pub struct InteractiveGuard;

impl InteractiveGuard {
    pub fn enter() -> Self {
        set_interactive(true);
        InteractiveGuard
    }
}

impl Drop for InteractiveGuard {
    fn drop(&mut self) {
        set_interactive(false);
    }
}

/// Passes events to `inner` only while no interactive display is active
pub struct QuietWhenInteractive<L> {
    inner: L,
}

impl<L> QuietWhenInteractive<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

impl<S, L> Layer<S> for QuietWhenInteractive<L>
where
    S: tracing::Subscriber,
    L: Layer<S>,
{
    // Span bookkeeping always reaches the inner layer; the fmt layer expects
    // fields recorded at creation when it later formats an event.
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        self.inner.on_new_span(attrs, id, ctx);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        self.inner.on_record(id, values, ctx);
    }

    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        self.inner.on_close(id, ctx);
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        if !is_interactive() {
            self.inner.on_event(event, ctx);
        }
    }

    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        if !is_interactive() {
            self.inner.on_enter(id, ctx);
        }
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        if !is_interactive() {
            self.inner.on_exit(id, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_flag() {
        assert!(!is_interactive());
        {
            let _guard = InteractiveGuard::enter();
            assert!(is_interactive());
        }
        assert!(!is_interactive());
    }
}
