pub mod runtime;
pub mod loader;
pub mod profiles;

pub use runtime::*;
pub use loader::*;
pub use profiles::*;
