//! URL handling module for Snapwire
//!
//! Article URLs are normalized before any lookup or insert so that the same
//! story reached through different feeds maps to one archive row.

mod normalize;

pub use normalize::normalize_url;
