mod distinct;

pub use distinct::*;
