pub mod gate;

pub use gate::OrderGate;
