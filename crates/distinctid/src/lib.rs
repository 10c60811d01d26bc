#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod buffer;
mod counter;
mod error;
mod id;
mod metrics;
mod service;
mod time;

pub use crate::buffer::*;
pub use crate::counter::*;
pub use crate::error::*;
pub use crate::id::*;
pub use crate::metrics::*;
pub use crate::service::*;
pub use crate::time::*;
