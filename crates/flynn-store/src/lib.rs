pub mod database;
pub mod schema;
pub mod sessions;

pub use database::Database;
pub use sessions::SqliteSessionStore;
