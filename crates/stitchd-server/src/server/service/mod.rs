pub mod assemble;
pub mod handler;
