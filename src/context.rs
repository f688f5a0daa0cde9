use std::{
    mem::take,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// A cancellable stop signal shared between a supervisor thread and everything it owns.
///
/// `T` is the cancellation payload: `Context<bool>` is a plain stop flag, while a
/// supervisor escalation step can use a richer `T` to also carry the reason it was
/// cancelled. Every cooperative wait in this crate goes through [`Context::wait_timeout`]
/// so cancellation latency is bounded by the wait's own timeout rather than by a
/// wall-clock sleep that cannot be interrupted.
#[derive(Debug, Clone, Default)]
pub struct Context<T>(Arc<(Mutex<T>, Condvar)>);

impl<T> Context<T>
where
    T: Default + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation signal and wakes every thread waiting on it.
    pub fn cancel_all(&self, val: T) -> Result<(), PoisonError<MutexGuard<'_, T>>> {
        let (lck, cvar) = &*self.0;
        let mut lck = lck.lock()?;
        *lck = val;
        cvar.notify_all();
        Ok(())
    }

    /// Returns the current value without waiting.
    pub fn get(&self) -> Result<T, PoisonError<MutexGuard<'_, T>>> {
        let (lck, _) = &*self.0;
        Ok(lck.lock()?.clone())
    }

    /// Waits up to `timeout` for the signal to be notified, returning the current
    /// value either way. This is the cancellable replacement for `thread::sleep`:
    /// callers race a pacing delay against cancellation instead of blocking
    /// uninterruptibly.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Result<T, PoisonError<MutexGuard<'_, T>>> {
        let (lck, cvar) = &*self.0;
        let guard = lck.lock()?;
        let (guard, _) = cvar
            .wait_timeout(guard, timeout)
            .map_err(|e| PoisonError::new(e.into_inner().0))?;
        Ok(guard.clone())
    }

    pub(crate) fn get_lock_cvar(&self) -> &(Mutex<T>, Condvar) {
        &self.0
    }

    /// Resets the signal to the default `T` value.
    pub fn reset(&self) -> Result<(), PoisonError<MutexGuard<'_, T>>> {
        let (lck, _) = &*self.0;
        let mut lck = lck.lock()?;
        *lck = <T as Default>::default();
        Ok(())
    }

    /// Blocks, without a timeout, until the signal is notified.
    pub fn wait(&self) -> Result<T, PoisonError<MutexGuard<'_, T>>> {
        let (lck, cvar) = &*self.0;
        let mut lck = lck.lock()?;
        lck = cvar.wait(lck)?;
        let current = take(&mut *lck);
        Ok(current)
    }
}

pub type StopSignal = Context<bool>;

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.get().unwrap_or(true)
    }

    pub fn stop(&self) {
        let _ = self.cancel_all(true);
    }
}
