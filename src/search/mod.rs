pub mod active_list;
pub mod alternate;
pub mod manager;
pub mod pruner;

pub use active_list::{ActiveList, ActiveListFactory, ActiveListKind};
pub use alternate::AlternateHypothesisManager;
pub use manager::SearchManager;
pub use pruner::Pruner;
