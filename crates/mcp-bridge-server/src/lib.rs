// ABOUTME: Library root re-exporting server modules for integration testing
// ABOUTME: Enables tests/ to build the router around an in-memory worker
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

pub mod admin;
pub mod auth;
pub mod health;
pub mod mcp;
pub mod rest;
pub mod router;
pub mod state;
pub mod streaming;
