//! Recycle bin: the only way files leave their original location.
//!
//! Files are moved under `root/<reason>/<category>/<original path>` and never
//! deleted permanently.

mod destination;
mod error;
mod mover;

pub use destination::{sanitize_category, translate_source, RecycleReason, UNCATEGORIZED};
pub use error::RecycleError;
pub use mover::{MovedFile, RecycleBin};
