//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Fault feature modules for HTTP and Redis experiments."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
//! Feature modules translating fault configs into discovery resources
//! and view properties. Each module registers its generators and its
//! transformation during daemon wiring.

pub mod redis;
pub mod server;
