pub mod maximize;
pub mod solver;
pub mod window;

pub use maximize::*;
pub use solver::*;
pub use window::*;
