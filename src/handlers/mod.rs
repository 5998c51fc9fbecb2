pub mod coaching;

pub use coaching::*;
