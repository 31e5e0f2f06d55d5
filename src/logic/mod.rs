pub mod bulk;
pub mod context;
pub mod planner;
pub mod resolver;

pub use bulk::*;
pub use context::*;
pub use planner::{MigrationPlan, PlanError};
pub use resolver::*;
