pub mod changesets;
pub mod mem;
pub mod migrator;
pub mod registry;
pub mod session;
pub mod traits;

pub use changesets::*;
pub use mem::*;
pub use migrator::*;
pub use registry::*;
pub use session::*;
pub use traits::*;
