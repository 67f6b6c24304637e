//! Configuration, command-line parsing, and logging setup.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Command-line interface parsing and TLS material loading.
pub mod cli;
/// Environment-driven runtime configuration.
pub mod config;
/// Enumerations used in configuration.
pub mod enums;
/// Diagnostics logger initialization.
pub mod logger;
