//! Terminal display utilities for CLI output.

pub mod tables;
pub mod theme;

pub use tables::{create_build_summary_table, create_topic_tree_table};
pub use theme::{THEME, Theme};
