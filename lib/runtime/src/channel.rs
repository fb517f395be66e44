// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Unbuffered rendezvous channel.
//!
//! A write handshakes with exactly one read. The handshake has two halves:
//! the writer publishes its value and notifies a reader; the reader consumes
//! the value and notifies the writer that the handoff concluded. Neither side
//! proceeds without the other, so the k-th completed write rendezvous is
//! always consumed by the k-th completed read.
//!
//! Two monotonic serials track the handoffs. `read_serial < write_serial`
//! means "a writer has posted a value no reader has consumed yet". A writer
//! whose completion wait is cancelled bumps `read_serial` by one on the way
//! out — the reader it was paired with never showed up, and future handoffs
//! must stay aligned.
//!
//! Close is terminal and idempotent: every pending reader and writer resolves
//! with [`ChannelError::Closed`], as does every subsequent operation.

use futures::Stream;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::condition::Condition;
use crate::error::ChannelError;

/// Both serials start at the same large-negative sentinel and only ever
/// increment.
const SERIAL_FLOOR: i64 = i64::MIN;

/// Unbuffered rendezvous channel for values of type `T`.
pub struct Channel<T> {
    state: Mutex<ChannelState<T>>,
    /// Readers parked until a value is posted.
    readers: Condition,
    /// Writers parked until their posted value is consumed.
    write_done: Condition,
    /// Writers parked until the single value slot frees up.
    write_slot: Condition,
}

struct ChannelState<T> {
    read_serial: i64,
    write_serial: i64,
    closed: bool,
    in_transit: bool,
    slot: Option<T>,
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                read_serial: SERIAL_FLOOR,
                write_serial: SERIAL_FLOOR,
                closed: false,
                in_transit: false,
                slot: None,
            }),
            readers: Condition::new(),
            write_done: Condition::new(),
            write_slot: Condition::new(),
        }
    }

    /// Write `value`, suspending until a reader consumes it.
    ///
    /// Errors: [`ChannelError::WriteCancelled`] when `cancel` fires during
    /// the admission or completion wait, [`ChannelError::Closed`] when the
    /// channel closes before or during the handoff. A write future dropped
    /// mid-handoff surrenders the slot and realigns the serials, exactly as
    /// a cancelled write does.
    pub async fn write(
        &self,
        value: T,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), ChannelError> {
        // Admission: at most one value may be in transit at a time. Waiters
        // register before the state lock drops, so no admission notify from
        // another thread can land in the gap.
        loop {
            let waiter = {
                let state = self.state.lock();
                if state.closed {
                    return Err(ChannelError::Closed);
                }
                if !state.in_transit {
                    break;
                }
                self.write_slot.register()
            };
            if !waiter.wait(cancel).await {
                return Err(ChannelError::WriteCancelled);
            }
        }

        // Publish and wake one reader.
        let target = {
            let mut state = self.state.lock();
            state.in_transit = true;
            state.slot = Some(value);
            state.write_serial += 1;
            state.write_serial
        };
        self.readers.notify_one();

        // The slot must be surrendered however this future ends, including a
        // drop while parked below.
        let mut handoff = HandoffGuard {
            channel: self,
            target,
            armed: true,
        };

        // Wait for a reader to conclude this handoff.
        let mut cancelled = false;
        loop {
            let waiter = {
                let state = self.state.lock();
                if state.read_serial >= target || state.closed {
                    break;
                }
                self.write_done.register()
            };
            if !waiter.wait(cancel).await {
                cancelled = true;
                break;
            }
        }
        handoff.armed = false;

        // Epilogue, on every path: clear the slot and re-admit writers.
        let closed = {
            let mut state = self.state.lock();
            if cancelled {
                // The paired reader never arrived; keep the serials aligned
                // for whoever reads next.
                state.read_serial += 1;
                tracing::trace!(serial = state.read_serial, "write abandoned, serial bumped");
            }
            state.slot = None;
            state.in_transit = false;
            state.closed
        };
        self.write_slot.notify_one();

        if cancelled {
            return Err(ChannelError::WriteCancelled);
        }
        if closed {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    /// Read one value, suspending until a writer posts it.
    ///
    /// Errors: [`ChannelError::ReadCancelled`] when `cancel` fires while
    /// parked, [`ChannelError::Closed`] when the channel closes first.
    pub async fn read(&self, cancel: Option<&CancellationToken>) -> Result<T, ChannelError> {
        self.read_with(cancel, || true).await
    }

    /// Read with a claim hook deciding whether this reader takes the value.
    ///
    /// The hook runs under the state lock at the instant a posted value is
    /// available. Declining raises [`ChannelError::ReadCancelled`] and leaves
    /// the value for another reader — select arms use this so exactly one of
    /// them concludes a handoff.
    pub(crate) async fn read_with(
        &self,
        cancel: Option<&CancellationToken>,
        mut claim: impl FnMut() -> bool,
    ) -> Result<T, ChannelError> {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(ChannelError::Closed);
                }
                if state.read_serial < state.write_serial {
                    if !claim() {
                        return Err(ChannelError::ReadCancelled);
                    }
                    let value = state
                        .slot
                        .take()
                        .expect("posted value present while a handoff is pending");
                    state.read_serial += 1;
                    drop(state);
                    self.write_done.notify_one();
                    return Ok(value);
                }
                self.readers.register()
            };
            if !waiter.wait(cancel).await {
                return Err(ChannelError::ReadCancelled);
            }
        }
    }

    /// Close the channel. Idempotent.
    ///
    /// All parked readers and writers are woken and resolve with
    /// [`ChannelError::Closed`]; so does every subsequent operation.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        tracing::debug!("channel closed");
        self.readers.notify_all();
        self.write_done.notify_all();
        self.write_slot.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Yield values by repeated reads until cancellation or close.
    ///
    /// Both terminations end the stream normally rather than surfacing an
    /// error; distinguishing them is the caller's business via the token or
    /// [`Channel::is_closed`].
    pub fn iterate<'a>(
        &'a self,
        cancel: Option<&'a CancellationToken>,
    ) -> impl Stream<Item = T> + 'a {
        async_stream::stream! {
            loop {
                match self.read(cancel).await {
                    Ok(value) => yield value,
                    Err(_) => break,
                }
            }
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the abandonment half of the write epilogue when a write future is
/// dropped between publishing and concluding its handoff.
struct HandoffGuard<'a, T> {
    channel: &'a Channel<T>,
    target: i64,
    armed: bool,
}

impl<T> Drop for HandoffGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.channel.state.lock();
            if state.read_serial < self.target {
                // No reader concluded this handoff; realign the serials.
                state.read_serial += 1;
            }
            state.slot = None;
            state.in_transit = false;
        }
        self.channel.write_slot.notify_one();
    }
}
