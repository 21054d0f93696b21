pub mod engine;
pub mod events;
#[cfg(test)]
pub(crate) mod fakes;
pub mod guard;
pub mod journal;
pub mod local_store;
pub mod local_watcher;
pub mod paths;
pub mod reconcile;
pub mod schedule;
pub mod snapshot;
