//! Data-source registry and resolution of declarative descriptors into
//! concrete [`ResolvedRequest`](weft_core::ResolvedRequest)s.

pub mod config;
pub mod registry;
pub mod resolver;

pub use config::GlobalConfig;
pub use registry::DataSourceRegistry;
pub use resolver::DataSourceResolver;
