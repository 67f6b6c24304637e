//! SQLite-backed log store: schema management, event/APDU rows, admin
//! users and tokens.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Admin users and bearer-token rows.
pub mod admin;
/// Log rows, payload blobs, APDU events and their query surface.
pub mod logs;
/// Store opening, schema initialization and in-place migrations.
pub mod schema;
