pub mod daemon;
pub mod hook;
pub mod pause;
