pub mod access;
pub mod dashboard;
pub mod requests;
pub mod routes;
pub mod tracking;


pub use dashboard::{Dashboard, DashboardService};
pub use requests::{Approval, ApproveOptions, NewRequest, RequestLifecycle};
pub use routes::{RouteCompletion, RouteLifecycle, TrackingView};
pub use tracking::RouteProgress;
