pub mod env;
pub mod launch;
pub mod node;
pub mod register;
