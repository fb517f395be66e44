// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cancellable timer.

pub use tokio::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Sleep for `duration`, or until `cancel` fires.
///
/// Returns `true` when the full duration elapsed and `false` on
/// cancellation. A token that is already cancelled on entry returns `false`
/// without constructing a timer; on the cancellation path the timer future
/// is dropped, which deregisters its timer entry. Either way the call
/// resolves exactly once.
pub async fn sleep(duration: Duration, cancel: Option<&CancellationToken>) -> bool {
    let Some(token) = cancel else {
        tokio::time::sleep(duration).await;
        return true;
    };
    if token.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
