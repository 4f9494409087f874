mod context;
mod mocks;
mod temp;

pub use context::*;
pub use mocks::*;
pub use temp::*;
