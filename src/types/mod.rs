pub mod trading;
pub mod candle;
pub mod signal;

pub use trading::*;
pub use candle::*;
pub use signal::*;
