#[allow(clippy::module_inception)]
pub mod actor;
pub mod spawn;

pub use actor::{Actor, ActorContext, ActorRef};
pub use spawn::spawn_actor;
