use anyhow::{Context, Result};
use std::marker::PhantomData;

/// Work done by one stage: turns one item of `I` into one item of `O`.
///
/// All workers of a stage call `apply` on the same shared value, hence the
/// `Send + Sync` bound. Returning `Err` (or panicking) is a worker fault and
/// is handled according to the pipeline's `FaultPolicy`.
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, input: I) -> Result<O>;

    /// Runs `next` on this transform's output inside the same worker, so two
    /// steps share one stage instead of being joined by a queue.
    fn then<T, M>(self, next: T) -> Chain<Self, T, O>
    where
        Self: Sized,
        T: Transform<O, M>,
        O: Send,
        M: Send,
    {
        Chain {
            first: self,
            second: next,
            _marker: PhantomData,
        }
    }
}

/// Two transforms fused by [`Transform::then`]; `M` is the hand-off type.
#[derive(Debug)]
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _marker: PhantomData<fn() -> M>,
}

impl<I, M, O, A, B> Transform<I, O> for Chain<A, B, M>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Send,
{
    fn apply(&self, input: I) -> Result<O> {
        let mid = self.first.apply(input).with_context(|| {
            format!("fused step 1 of 2 ({}) failed", std::any::type_name::<A>())
        })?;
        self.second.apply(mid).with_context(|| {
            format!("fused step 2 of 2 ({}) failed", std::any::type_name::<B>())
        })
    }
}

/// Transform backed by a closure. Built with [`from_fn`].
pub struct FnTransform<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

/// Wraps `f` as a [`Transform`].
///
/// ```ignore
/// let to_token = from_fn(|i: u64| Ok(format!("token_{}", i)));
/// ```
pub fn from_fn<F, I, O>(f: F) -> FnTransform<F, I, O>
where
    F: Fn(I) -> Result<O> + Send + Sync,
{
    FnTransform {
        f,
        _marker: PhantomData,
    }
}

impl<F, I, O> Transform<I, O> for FnTransform<F, I, O>
where
    F: Fn(I) -> Result<O> + Send + Sync,
{
    #[inline]
    fn apply(&self, input: I) -> Result<O> {
        (self.f)(input)
    }
}

impl<F, I, O> std::fmt::Debug for FnTransform<F, I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform")
            .field("input", &std::any::type_name::<I>())
            .field("output", &std::any::type_name::<O>())
            .finish()
    }
}
