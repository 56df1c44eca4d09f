//! End-to-end tests across the whole pipeline.

mod routing;
mod support;
