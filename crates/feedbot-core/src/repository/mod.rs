//! Typed access to the documents the bot keeps in the document store.

pub mod feedback;
pub mod history;

pub use feedback::FeedbackRepository;
pub use history::HistoryRepository;
