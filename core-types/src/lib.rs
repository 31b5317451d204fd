// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Core types, partition layout, config, and schemas.

pub mod cancel;
pub mod config;
pub mod error;
pub mod layout;
pub mod retry;
pub mod schema;
pub mod types;
