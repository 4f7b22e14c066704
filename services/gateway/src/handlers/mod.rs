pub mod analytics;
pub mod inventory;
pub mod registry;
pub mod requests;
pub mod routes;
pub mod transfers;
