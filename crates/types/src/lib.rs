pub mod audit;
pub mod cascade;
pub mod checkpoint;
pub mod clock;
pub mod effect;
pub mod event;
pub mod order;
pub mod phase;
pub mod workflow;

pub use audit::*;
pub use cascade::*;
pub use checkpoint::*;
pub use clock::*;
pub use effect::*;
pub use event::*;
pub use order::*;
pub use phase::*;
pub use workflow::*;
