//! Utility modules

pub mod state_dir;
