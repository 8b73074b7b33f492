//! Observable events
//!
//! Events are explicit and typed; each maps to one stable log event name.

use std::fmt;

use super::logger::Severity;

/// Events emitted by the translator and the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded from disk
    ConfigLoaded,

    // Translation
    /// Translation of one expression tree begins
    TranslationStart,
    /// A group stage was synthesised for one correlation scope
    GroupStagePlanned,
    /// A provably redundant stage was dropped
    StageEliminated,
    /// Stage list produced
    TranslationComplete,
    /// Translation aborted
    TranslationRejected,

    // Codec
    /// Reader met a tag outside the recognised set
    CodecUnknownType,
    /// Bookmark could not be restored
    CodecStaleBookmark,
    /// Reader or writer gave up its transport
    TransportReleased,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::TranslationStart => "TRANSLATION_BEGIN",
            Event::GroupStagePlanned => "GROUP_STAGE_PLANNED",
            Event::StageEliminated => "STAGE_ELIMINATED",
            Event::TranslationComplete => "TRANSLATION_COMPLETE",
            Event::TranslationRejected => "TRANSLATION_REJECTED",
            Event::CodecUnknownType => "BSON_UNKNOWN_TYPE",
            Event::CodecStaleBookmark => "BSON_STALE_BOOKMARK",
            Event::TransportReleased => "TRANSPORT_RELEASED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::TranslationRejected => Severity::Error,
            Event::CodecUnknownType | Event::CodecStaleBookmark => Severity::Warn,
            Event::ConfigLoaded | Event::TranslationStart | Event::TranslationComplete => {
                Severity::Info
            }
            Event::GroupStagePlanned | Event::StageEliminated | Event::TransportReleased => {
                Severity::Trace
            }
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
