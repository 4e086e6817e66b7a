pub mod agent;
pub mod session;
pub mod spec;
pub mod task;

pub use agent::*;
pub use session::*;
pub use spec::*;
pub use task::*;
