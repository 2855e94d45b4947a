//! A cloneable, broadcast-style cancellation primitive.
//!
//! A [`CancellationTokenHandle`] is held by whoever may abort a judge run (the
//! Ctrl-C handler, a caller withdrawing a submission). Every suspension point
//! that should react to it awaits a [`CancellationToken`] obtained from the
//! handle.

use std::{
    future::Future,
    pin::Pin,
    sync::atomic::AtomicBool,
    sync::atomic::AtomicUsize,
    sync::atomic::Ordering,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use dashmap::DashMap;

#[derive(Clone, Default)]
pub struct CancellationTokenHandle {
    token_ref: Option<Arc<InnerCToken>>,
}

impl CancellationTokenHandle {
    pub fn new() -> CancellationTokenHandle {
        CancellationTokenHandle {
            token_ref: Some(Arc::new(InnerCToken {
                cancelled: AtomicBool::new(false),
                counter: AtomicUsize::new(0),
                wakers: DashMap::new(),
            })),
        }
    }

    /// A handle that can never be cancelled. Tokens taken from it stay pending forever.
    pub fn empty() -> CancellationTokenHandle {
        Self::default()
    }

    pub fn cancel(&self) {
        if let Some(r) = self.token_ref.as_ref() {
            r.wake_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token_ref
            .as_ref()
            .map_or(false, |r| r.cancelled.load(Ordering::SeqCst))
    }

    pub fn get_token(&self) -> CancellationToken {
        CancellationToken {
            token_ref: self.token_ref.clone(),
            waker_id: None,
        }
    }

    /// Alias of [`Self::get_token`] that reads better at await sites.
    pub fn cancelled(&self) -> CancellationToken {
        self.get_token()
    }
}

impl std::fmt::Debug for CancellationTokenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationTokenHandle")
            .field("cancellable", &self.token_ref.is_some())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct InnerCToken {
    cancelled: AtomicBool,
    counter: AtomicUsize,
    wakers: DashMap<usize, Waker>,
}

impl InnerCToken {
    fn store_waker(&self, waker: Waker) -> usize {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        self.wakers.insert(id, waker);
        id
    }

    fn drop_waker(&self, id: usize) -> Option<Waker> {
        self.wakers.remove(&id).map(|(_id, waker)| waker)
    }

    fn wake_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wakers
            .iter()
            .for_each(|pair| pair.value().wake_by_ref());
    }
}

/// Future that resolves once the originating handle is cancelled.
pub struct CancellationToken {
    token_ref: Option<Arc<InnerCToken>>,
    waker_id: Option<usize>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.token_ref
            .as_ref()
            .map_or(false, |r| r.cancelled.load(Ordering::SeqCst))
    }
}

impl Future for CancellationToken {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let token_ref = match self.token_ref.clone() {
            Some(r) => r,
            None => return Poll::Pending,
        };
        if token_ref.cancelled.load(Ordering::SeqCst) {
            if let Some(id) = self.waker_id.take() {
                token_ref.drop_waker(id);
            }
            return Poll::Ready(());
        }
        let id = token_ref.store_waker(cx.waker().clone());
        if let Some(id) = self.waker_id.replace(id) {
            token_ref.drop_waker(id);
        }
        // `cancel()` may have run between the check above and storing the waker.
        if token_ref.cancelled.load(Ordering::SeqCst) {
            if let Some(id) = self.waker_id.take() {
                token_ref.drop_waker(id);
            }
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

impl Drop for CancellationToken {
    fn drop(&mut self) {
        if let Some(token_ref) = self.token_ref.as_ref() {
            if let Some(id) = self.waker_id.take() {
                token_ref.drop_waker(id);
            }
        }
    }
}

/// Future adaptor returned by [`CancelFutureExt::with_cancel`].
pub struct WithCancel<F, C> {
    fut: Pin<Box<F>>,
    cancel: Pin<Box<C>>,
}

impl<F, C> Future for WithCancel<F, C>
where
    F: Future,
    C: Future<Output = ()>,
{
    type Output = Option<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.cancel.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        this.fut.as_mut().poll(cx).map(Some)
    }
}

pub trait CancelFutureExt: Future + Sized {
    /// Run this future until it completes or `cancel` resolves, whichever
    /// comes first. Returns `None` when cancelled.
    fn with_cancel<C>(self, cancel: C) -> WithCancel<Self, C>
    where
        C: Future<Output = ()>,
    {
        WithCancel {
            fut: Box::pin(self),
            cancel: Box::pin(cancel),
        }
    }
}

impl<F: Future> CancelFutureExt for F {}
