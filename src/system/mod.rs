//! # System Interaction Layer
//!
//! The boundary between the resolution engine and the operating system.
//!
//! ## Modules
//!
//! - **`executor`**: spawns external processes with an explicitly derived environment,
//!   propagates their exit status and stops them on `SIGINT`/`SIGTERM`.
//! - **`environment`**: the startup snapshot of the process environment and the variable
//!   naming scheme used for `CLK_P_*`, `CLK_E_*` and `CLK___*` variables.

pub mod environment;
pub mod executor;
