pub mod build;
pub mod checkpoint;
pub mod compact;
pub mod journal;
pub mod reconcile;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod types;

pub use reconcile::{apply_change, rebuild, reconcile, ChangeOutcome, ReconcileReport};
pub use snapshot::{IndexSnapshot, IndexedDoc};
pub use store::{IndexStore, Mutation, MutationOutcome, StoreOptions};
pub use types::*;
