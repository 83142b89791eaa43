//! Types shared between the harvester and anything that consumes its output

mod record;
mod watermark;

pub use record::{CanonicalRecord, Identifier, IdentifierKind};
pub use watermark::{Watermark, EPOCH_WATERMARK};
