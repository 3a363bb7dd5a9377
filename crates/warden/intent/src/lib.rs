//! Warden Intent - turns a free-text request into an [`Intent`].
//!
//! Deterministic rules run first. Only when none of them match is the text
//! handed to an [`IntentModel`], under its own timeout; a model answer never
//! overrides a rule match.
//!
//! [`Intent`]: warden_types::Intent

#![deny(unsafe_code)]

pub mod classifier;
pub mod model;
mod rules;

pub use classifier::{ClassifierConfig, IntentClassifier};
pub use model::{ChatCompletionsModel, IntentModel, ModelError, ModelIntent};
pub use rules::match_rules;
