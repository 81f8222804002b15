//! Candidate profile lookup
//!
//! The controller resolves the candidate's profile exactly once per bootstrap,
//! through the [`ProfileRepository`] contract. [`HttpProfileRepository`] talks to
//! a key-indexed JSON document store over HTTP.

mod http;
mod repository;

pub use http::HttpProfileRepository;
pub use repository::{CandidateProfile, ProfileError, ProfileRepository, Resume};
