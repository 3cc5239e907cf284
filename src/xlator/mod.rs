//! Translator graph runtime (C4): the `Translator` node type, its lifecycle,
//! and the loaded `Graph`.

mod options;
mod translator;

pub use options::{OptionDescriptor, OptionSchema, OptionType, validate_graph};
pub(crate) use options::{parse_bool, parse_size_bytes};
pub use translator::{Graph, Translator, TranslatorState};
