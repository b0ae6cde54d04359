//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Shared primitives and utilities for the control plane."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
//! Shared configuration, logging, and time utilities for the Faultline
//! control plane.

pub mod config;
pub mod logging;
pub mod time;
