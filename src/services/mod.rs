//! Business logic services
//!
//! This module contains the hotspot apply workflow separated from HTTP
//! concerns. System access happens only through the collaborator traits
//! (`NetworkApplier`, `SettingsStore`, `StatusSource`, `DeviceEnumerator`),
//! implemented for the host in `crate::system`.

pub mod apply;
pub mod devices;
pub mod journal;
pub mod profile_store;
pub mod session_risk;
pub mod status;
