pub mod artifacts;
pub mod extraction;
pub mod normalize;
pub mod notifier;
pub mod orchestrator;
pub mod validation;
