//! Building the upstream request for a chat turn.

pub mod history;
pub mod input;

pub use history::shape_history;
pub use input::InputAssembler;
