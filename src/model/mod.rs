pub mod migration;
pub mod request;
pub mod tenant;

pub use migration::*;
pub use request::*;
pub use tenant::*;
