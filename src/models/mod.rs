mod delivery;
mod event;
mod order;
mod retry;

pub use delivery::*;
pub use event::*;
pub use order::*;
pub use retry::*;
