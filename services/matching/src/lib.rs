pub mod demand;
pub mod engine;
pub mod eta;
pub mod routing;


pub use demand::{DemandMatch, DemandMatcher, UnitDemand};
pub use engine::{BankMatch, BankMatchingEngine, MatchQuery, ScoreBreakdown};
pub use eta::{EtaEstimator, Jitter, NoJitter, UniformJitter};
pub use routing::{RoutePlanner, RoutingEstimate};
