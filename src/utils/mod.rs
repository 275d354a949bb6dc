//! Shared utility functions for devflow.
//!
//! This module provides common utilities used across multiple modules,
//! including JSON extraction from LLM responses.

pub mod json_extraction;

pub use json_extraction::{extract_json_object, find_matching_brace, outer_brace_span};
