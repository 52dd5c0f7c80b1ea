//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated metadata ([`ProviderDescriptor`]) covering the authorize and
//! token endpoints plus provider quirks (scope delimiter, extra authorize parameters).
//! `strategy` defines [`ProviderStrategy`], an HTTP-client-agnostic hook that classifies token
//! endpoint failures into the session error taxonomy.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
