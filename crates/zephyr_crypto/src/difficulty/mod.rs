pub mod filter;
pub mod retarget;
pub mod target;
