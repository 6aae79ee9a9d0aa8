//! Infrastructure Adapters
//!
//! 六边形架构的适配器实现

pub mod device;
pub mod ingest;

pub use device::*;
pub use ingest::*;
