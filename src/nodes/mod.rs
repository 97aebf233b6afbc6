pub mod agent;
pub mod ai;
pub mod control_flow;
pub mod executor;
pub mod flow;
pub mod human_input;
pub mod knowledge;
pub mod transform;
pub mod utils;

pub use executor::*;
pub use human_input::{InteractionAnswer, InteractionRequest, UserInput};
