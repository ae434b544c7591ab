pub mod resolver;
pub mod trigger;

pub use resolver::{ArchiveResolver, Outcome};
pub use trigger::EagerTrigger;
