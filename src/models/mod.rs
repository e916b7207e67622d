pub mod document;
pub mod submission;

pub use document::*;
pub use submission::*;
