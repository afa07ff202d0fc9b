mod notification;
mod spectator;
pub(crate) mod watch_loop;
pub use notification::*;
pub use spectator::*;
pub use watch_loop::LoopState;

#[cfg(test)]
mod watch_loop_test;
