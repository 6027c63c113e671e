use crate::debug::DebugLogger;
use crate::entity::{EntityKind, Uid};
use crate::types::Pt;
use serde_json::json;

/// Recoverable problems found while laying out a stream. None of these stop
/// the pass; each degrades the output locally.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutWarning {
    #[error("{kind} at index {index} has no matching opener; treated as closed")]
    UnmatchedEnd { kind: EntityKind, index: usize },
    #[error("{kind} at index {index} is outside its container; ignored")]
    StrayEntity { kind: EntityKind, index: usize },
    #[error("{kind} left open at the end of its stream")]
    Unclosed { kind: EntityKind },
    #[error("stream refers to missing entity {0}")]
    DanglingReference(Uid),
    #[error("font {face} {style} {size}px unavailable; using the default face")]
    FontFallback {
        face: String,
        style: String,
        size: i32,
    },
    #[error("clip {name:?} of {width}x{height} exceeds the size limit; clamped to zero area")]
    OversizedClip { name: String, width: Pt, height: Pt },
    #[error("table at index {index} nests {depth} levels deep; subtree skipped")]
    TableDepthExceeded { depth: usize, index: usize },
    #[error("placement at index {index} did not settle; content may overlap")]
    WrapLoop { index: usize },
}

impl LayoutWarning {
    fn code(&self) -> &'static str {
        match self {
            LayoutWarning::UnmatchedEnd { .. } => "unmatched_end",
            LayoutWarning::StrayEntity { .. } => "stray_entity",
            LayoutWarning::Unclosed { .. } => "unclosed",
            LayoutWarning::DanglingReference(_) => "dangling_reference",
            LayoutWarning::FontFallback { .. } => "font_fallback",
            LayoutWarning::OversizedClip { .. } => "oversized_clip",
            LayoutWarning::TableDepthExceeded { .. } => "table_depth",
            LayoutWarning::WrapLoop { .. } => "wrap_loop",
        }
    }
}

/// Per-pass warning collector.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<LayoutWarning>,
    debug: Option<DebugLogger>,
    quiet: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(debug: Option<DebugLogger>) -> Self {
        Self {
            debug,
            ..Self::default()
        }
    }

    /// Collects without logging; used for measuring passes whose warnings the
    /// real pass repeats.
    pub(crate) fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    /// For a pass that repeats one already reported: warnings are collected
    /// without logging them again, while `debug` still receives the pass's
    /// own events.
    pub(crate) fn repeating(debug: Option<DebugLogger>) -> Self {
        Self {
            debug,
            quiet: true,
            ..Self::default()
        }
    }

    pub fn warn(&mut self, warning: LayoutWarning) {
        if !self.quiet {
            match &warning {
                LayoutWarning::FontFallback { .. } => log::error!("{warning}"),
                _ => log::warn!("{warning}"),
            }
            if let Some(debug) = &self.debug {
                debug.log_event(
                    "layout.warning",
                    json!({ "code": warning.code(), "message": warning.to_string() }),
                );
                debug.increment(warning.code(), 1);
            }
        }
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[LayoutWarning] {
        &self.warnings
    }

    pub fn debug(&self) -> Option<&DebugLogger> {
        self.debug.as_ref()
    }

    pub fn into_warnings(self) -> Vec<LayoutWarning> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_warnings_in_order() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.warn(LayoutWarning::Unclosed {
            kind: EntityKind::List,
        });
        diagnostics.warn(LayoutWarning::UnmatchedEnd {
            kind: EntityKind::TableEnd,
            index: 4,
        });
        assert_eq!(diagnostics.warnings().len(), 2);
        assert_eq!(
            diagnostics.warnings()[1].to_string(),
            "TableEnd at index 4 has no matching opener; treated as closed"
        );
    }

    #[test]
    fn repeating_collector_keeps_the_debug_logger() {
        let diagnostics = Diagnostics::repeating(Some(DebugLogger::from_writer(std::io::sink())));
        assert!(diagnostics.debug().is_some());
        assert!(Diagnostics::quiet().debug().is_none());
    }

    #[test]
    fn quiet_collector_still_records() {
        let mut diagnostics = Diagnostics::quiet();
        diagnostics.warn(LayoutWarning::WrapLoop { index: 1 });
        assert_eq!(diagnostics.into_warnings().len(), 1);
    }
}
