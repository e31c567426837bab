//! Tracing setup and event-rendering helpers (ambient stack, spec §1.1).
//!
//! Grounded on the teacher's `telemetry/mod.rs` (`EventRender`,
//! `TelemetryFormatter`, `PlainFormatter`) and its example binaries'
//! `init_tracing()` (`examples/demo1.rs`): env-filter + fmt layer +
//! `tracing-error::ErrorLayer`. The teacher's `render_errors` (keyed to the
//! deleted `channels::errors::ErrorEvent`/`LadderError` chain) has no
//! counterpart here — node/run failures are just `Event::NodeError` /
//! `Event::PregelError` values, rendered by `render_event` like any other
//! event.

use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for one event, ready for a sink to write out.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    #[must_use]
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlainFormatter;

impl PlainFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = format!("{LINE_COLOR}{event}{RESET_COLOR}\n");
        let context = match event {
            Event::Node(node) => Some(node.scope().to_string()),
            Event::Diagnostic(diag) => Some(diag.scope().to_string()),
            other => Some(format!("{other:?}").split_whitespace().next().map_or_else(
                || "event".to_string(),
                std::string::ToString::to_string,
            )),
        };
        EventRender {
            context,
            lines: vec![line],
        }
    }
}

/// Installs a registry subscriber with an env-filter (`RUST_LOG`, default
/// `error,bspgraph=info`), span-lifecycle logging, and error-chain capture.
/// Intended for binaries and integration tests, not library code.
pub fn init_tracing() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("error,bspgraph=info"))
        .unwrap_or_else(|_| EnvFilter::new("error"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_formatter_renders_node_event_with_scope_context() {
        let event = Event::node_message("routing", "picked branch a");
        let rendered = PlainFormatter.render_event(&event);
        assert_eq!(rendered.context.as_deref(), Some("routing"));
        assert!(rendered.join_lines().contains("picked branch a"));
    }
}
