//! Translator driver
//!
//! Wires the passes together: capability check, accumulator planning and
//! stage emission, configured by [`TranslatorConfig`].

mod config;
mod explain;
mod translator;

pub use config::TranslatorConfig;
pub use explain::ExplainTranslation;
pub use translator::{check_capabilities, Translation, Translator};
