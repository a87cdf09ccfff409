pub mod cache;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod errors;
pub mod installer;
pub mod integrity;
pub mod project;
pub mod registry;
pub mod resolver;
pub mod shims;
pub mod spec;

pub use cache::{Cache, CacheEntry};
pub use env::Env;
pub use errors::CorepackError;
pub use integrity::{HashAlgo, Integrity};
pub use project::Project;
pub use resolver::Resolution;
pub use spec::{SpecLocator, SpecRequest, VersionExpression};
