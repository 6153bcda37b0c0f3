//! Provisioning actions
//!
//! Each module wraps one external concern (apt, vendor downloads, groups,
//! profile scripts, runtime config, systemd). Stages compose them.

pub mod deploy;
pub mod download;
pub mod groups;
pub mod packages;
pub mod profile;
pub mod runtime_config;
pub mod service;
