#![deny(missing_docs)]
#![doc = "Shared errors, deterministic randomness and canonical dataset types for multiverse meta-analysis."]

pub mod errors;
pub mod provenance;
pub mod rng;
mod types;

pub use errors::{ErrorInfo, MverseError};
pub use provenance::{RunProvenance, SchemaVersion};
pub use rng::{derive_substream_seed, RngHandle};
pub use types::{EffectRow, EffectSizes, IdSet, RowDataset};
