pub mod expiry;
pub mod ledger;
pub mod transfer;


pub use expiry::ExpiryPolicy;
pub use ledger::{FlaggedUnit, InventoryLedger, NewUnit, Reservation};
pub use transfer::{NewTransfer, TransferDetail, TransferService};
