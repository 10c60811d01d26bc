#[cfg(all(feature = "file", unix))]
mod file;
mod interface;
mod memory;
#[cfg(feature = "redis")]
mod redis;

#[cfg_attr(docsrs, doc(cfg(all(feature = "file", unix))))]
#[cfg(all(feature = "file", unix))]
pub use file::*;
pub use interface::*;
pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
#[cfg(feature = "redis")]
pub use redis::*;
