//! Stream messages - classification of the external tool's JSON-Lines output
//!
//! - `message`: [`StreamMessage`], [`MessageKind`], [`Segment`]
//! - `parser`: [`parse`] (pure, total)
//! - `usage`: ordered token-usage probes

pub mod message;
pub mod parser;
pub mod usage;

pub use message::{MessageKind, Segment, StreamMessage, NO_CONTENT};
pub use parser::{parse, parse_value};
pub use usage::{extract_tokens, extract_tokens_with, TokenProbe, TOKEN_PROBES};
