// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Channel failure kinds.
//!
//! Cancellation and close are *expected* conditions, not faults: iteration
//! and select recover from them locally, and other callers branch on the
//! kind. User-operation failures elsewhere in the crate travel as
//! [`anyhow::Error`] instead.

/// Value-shaped failure kinds surfaced by [`Channel`](crate::Channel)
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel was closed before or during the operation.
    #[error("channel is closed")]
    Closed,
    /// A read was cancelled by its token, or declined its handoff.
    #[error("read cancelled")]
    ReadCancelled,
    /// A write was cancelled by its token while waiting.
    #[error("write cancelled")]
    WriteCancelled,
}
