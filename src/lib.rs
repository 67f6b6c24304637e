// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod admin;
pub mod cfg;
pub mod logging;
pub mod nfc;
pub mod relay;
pub mod retention;
pub mod store;
