pub mod memory;
pub mod notifications;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryStore;
pub use notifications::{InMemoryNotificationLog, NotificationSink, NOTIFICATION_CAPACITY};
pub use postgres::PostgresStorage;
pub use traits::Storage;
