// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Structured-block interception for streamed text
//
// `BlockInterceptor` is the per-stream state machine; `InterceptorHandle`
// serializes submissions to one interceptor from any number of tasks.

mod handle;
mod machine;

pub use handle::{InterceptError, InterceptorHandle};
pub use machine::{BlockInterceptor, Filtered, FlushReason, InterceptStats, Phase};
