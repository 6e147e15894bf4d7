mod context;
mod helpers;
mod result;
mod scope;
mod sequence;
mod serial;
mod task;
mod weights;

pub use context::*;
pub use helpers::*;
pub use result::*;
pub use scope::*;
pub use sequence::*;
pub use serial::*;
pub use task::*;
pub use weights::*;
