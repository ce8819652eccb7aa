mod error;
mod memory;
mod schema;
mod state;
mod store;

pub use error::DbError;
pub use memory::MemoryJobState;
pub use state::{JobState, iterate_entities};
pub use store::{SqliteJobState, default_db_path};
