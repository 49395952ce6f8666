// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loading for the Parley agent gateway.
//!
//! TOML files merged in XDG order with `PARLEY_` environment overrides.

pub mod loader;
pub mod model;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::ParleyConfig;
