//! Pipeline stage implementations, in execution order.

mod abstractions;
mod chapters;
mod combine;
mod fetch;
mod order;
mod relationships;

pub use abstractions::IdentifyAbstractions;
pub use chapters::{WriteChapters, ensure_heading};
pub use combine::{CombineTutorial, OutputFile, TutorialOutput};
pub use fetch::FetchRepo;
pub use order::{OrderChapters, set_order};
pub use relationships::AnalyzeRelationships;
