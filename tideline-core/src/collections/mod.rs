//! Collections
//!
//! Containers used to keep derived views in order as items stream in.

mod ordered_view;

pub use ordered_view::{Filter, OrderedView};
