//! Logic modules: from declarations to concrete qubes.
//!
//! # Modules
//!
//! - `merge` - how attribute layers combine
//! - `resolver` - profiles, template inheritance and class rules

pub mod merge;
pub mod resolver;
