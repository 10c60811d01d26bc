mod epoch;
mod interface;

pub use epoch::*;
pub use interface::*;
