pub mod snapshot;

pub use snapshot::{sanitize_datasource_id, SnapshotMeta, SnapshotStore, VectorIndexSnapshot};
