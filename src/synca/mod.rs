mod notify;
mod signals;

pub use notify::*;
pub use signals::*;
