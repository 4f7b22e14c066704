pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod locks;
pub mod logger;
pub mod models;
pub mod repository;
pub mod types;


pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use events::{DispatchEvent, EventBus};
pub use locks::KeyedLocks;
pub use repository::{Repository, Store, StoreError, UnitRepository};
