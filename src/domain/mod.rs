pub mod batch;
pub mod context;
pub mod order;
pub mod status;

pub use batch::*;
pub use context::*;
pub use order::*;
pub use status::*;
