mod backend;
mod cache;
mod keystore;
mod namesys;
mod network;
mod republisher;
mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::*;
pub use cache::*;
pub use keystore::*;
pub use namesys::*;
pub use network::*;
pub use republisher::*;
pub use service::*;
