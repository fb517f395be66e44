// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Multi-way select over rendezvous channels.
//!
//! [`select`] waits until exactly one of its arms concludes a handoff, runs
//! that arm's handler to completion, and returns. The losing arms' values are
//! never consumed — their paired writers stay parked for a future reader or
//! get cancelled by their own tokens.
//!
//! Every arm reads under a child token of the caller's cancel token, gated by
//! a shared claim flag: whichever read reaches a posted value first flips the
//! flag (under that channel's state lock) and owns the handoff; the others
//! decline and resolve as read-cancelled. After a claim the child token is
//! fired to hasten the siblings out of their wait-sets.
//!
//! `select` joins **all** arms rather than racing them. Only once every
//! sibling read has finalised is the claim flag quiescent and every channel's
//! serial pair consistent — a first-of shortcut can strand a second claimed
//! value. Sibling read-cancelled results are swallowed; any other failure,
//! including a closed arm, propagates.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::error::ChannelError;

/// One channel/handler pairing for [`select`]. Built with [`arm`].
pub struct SelectArm<'a> {
    read: Box<
        dyn FnOnce(Arc<AtomicBool>, CancellationToken) -> BoxFuture<'a, Result<(), ChannelError>>
            + Send
            + 'a,
    >,
}

/// Pair `channel` with the handler to run if it wins the select.
pub fn arm<'a, T, F, Fut>(channel: &'a Channel<T>, handler: F) -> SelectArm<'a>
where
    T: Send,
    F: FnOnce(T) -> Fut + Send + 'a,
    Fut: Future<Output = ()> + Send + 'a,
{
    SelectArm {
        read: Box::new(move |claimed, token| {
            async move {
                let outcome = channel
                    .read_with(Some(&token), || !claimed.swap(true, Ordering::SeqCst))
                    .await;
                match outcome {
                    Ok(value) => {
                        token.cancel();
                        handler(value).await;
                        Ok(())
                    }
                    Err(ChannelError::ReadCancelled) => Err(ChannelError::ReadCancelled),
                    Err(err) => {
                        // A failed arm also hastens its siblings out, or the
                        // join below would wait on reads nothing will serve.
                        token.cancel();
                        Err(err)
                    }
                }
            }
            .boxed()
        }),
    }
}

/// Wait for one of `arms` to deliver a value and run its handler.
///
/// At most one handler runs, across any interleaving. A `cancel` token fired
/// before any arm wins cancels every arm's read; `select` then returns `Ok`
/// with no handler run — the caller distinguishes that case via its token.
pub async fn select(
    arms: Vec<SelectArm<'_>>,
    cancel: Option<&CancellationToken>,
) -> Result<(), ChannelError> {
    let claimed = Arc::new(AtomicBool::new(false));
    let token = match cancel {
        Some(outer) => outer.child_token(),
        None => CancellationToken::new(),
    };

    let reads = arms
        .into_iter()
        .map(|arm| (arm.read)(claimed.clone(), token.clone()));
    for outcome in join_all(reads).await {
        match outcome {
            Ok(()) | Err(ChannelError::ReadCancelled) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn runs_exactly_one_handler() {
        let left = Arc::new(Channel::new());
        let right = Arc::new(Channel::new());

        let left_writer = {
            let left = left.clone();
            tokio::spawn(async move { left.write(1, None).await })
        };
        let right_writer = {
            let right = right.clone();
            tokio::spawn(async move { right.write(2, None).await })
        };
        tokio::task::yield_now().await;

        let left_hits = AtomicUsize::new(0);
        let right_hits = AtomicUsize::new(0);
        {
            let left_hits = &left_hits;
            let right_hits = &right_hits;
            select(
                vec![
                    arm(&left, move |_| async move {
                        left_hits.fetch_add(1, Ordering::SeqCst);
                    }),
                    arm(&right, move |_| async move {
                        right_hits.fetch_add(1, Ordering::SeqCst);
                    }),
                ],
                None,
            )
            .await
            .unwrap();
        }

        let left_ran = left_hits.load(Ordering::SeqCst);
        let right_ran = right_hits.load(Ordering::SeqCst);
        assert_eq!(left_ran + right_ran, 1);

        // The losing channel's value was not consumed: its writer is still
        // parked and a direct read receives the value.
        if left_ran == 1 {
            left_writer.await.unwrap().unwrap();
            assert_eq!(right.read(None).await.unwrap(), 2);
            right_writer.await.unwrap().unwrap();
        } else {
            right_writer.await.unwrap().unwrap();
            assert_eq!(left.read(None).await.unwrap(), 1);
            left_writer.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn external_cancellation_releases_every_arm() {
        let numbers: Arc<Channel<i32>> = Arc::new(Channel::new());
        let words: Arc<Channel<String>> = Arc::new(Channel::new());
        let token = CancellationToken::new();

        let selector = {
            let numbers = numbers.clone();
            let words = words.clone();
            let token = token.clone();
            tokio::spawn(async move {
                select(
                    vec![
                        arm(&numbers, |_| async {}),
                        arm(&words, |_| async {}),
                    ],
                    Some(&token),
                )
                .await
            })
        };
        tokio::task::yield_now().await;

        token.cancel();
        selector.await.unwrap().unwrap();

        // No reader remains parked on either channel.
        tokio::task::yield_now().await;
        let (wrote, read) = tokio::join!(numbers.write(9, None), numbers.read(None));
        wrote.unwrap();
        assert_eq!(read.unwrap(), 9);
    }

    #[tokio::test]
    async fn closed_arm_propagates() {
        let open: Arc<Channel<i32>> = Arc::new(Channel::new());
        let closing: Arc<Channel<i32>> = Arc::new(Channel::new());

        let selector = {
            let open = open.clone();
            let closing = closing.clone();
            tokio::spawn(async move {
                select(
                    vec![arm(&open, |_| async {}), arm(&closing, |_| async {})],
                    None,
                )
                .await
            })
        };
        tokio::task::yield_now().await;

        closing.close();
        assert_eq!(selector.await.unwrap(), Err(ChannelError::Closed));
    }
}
