// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod engine;
pub mod grammar;
pub mod intercept;
pub mod message;
pub mod proxy;
pub mod rules;
pub mod sink;
pub mod tools;
pub mod upstream;
