//! Concurrent ordered registry.
//!
//! A single lock guards an ordered `Vec<T>`. Every operation holds the lock for
//! its whole duration and never performs I/O while holding it. Reads hand out
//! copies, so a snapshot is never affected by later mutation.

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, Result};

/// Lock-guarded ordered collection shared between tasks.
pub struct Registry<T> {
    items: Mutex<Vec<T>>,
    shutdown: CancellationToken,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    /// Create an empty registry that is never cancelled.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Create an empty registry whose operations fail with
    /// [`DispatchError::Cancelled`] once `shutdown` fires.
    pub fn with_cancellation(shutdown: CancellationToken) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Vec<T>>> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DispatchError::Cancelled),
            guard = self.items.lock() => Ok(guard),
        }
    }

    /// Append an item.
    pub async fn add(&self, item: T) -> Result<()> {
        self.lock().await?.push(item);
        Ok(())
    }

    /// Append every item, in order, as one atomic step.
    pub async fn add_all<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        self.lock().await?.extend(items);
        Ok(())
    }

    /// Replace the contents with an empty collection.
    pub async fn reset(&self) -> Result<()> {
        *self.lock().await? = Vec::new();
        Ok(())
    }

    /// Number of items.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.lock().await?.len())
    }
}

impl<T: PartialEq> Registry<T> {
    /// Remove the first item equal to `item`. Returns false if none matched.
    pub async fn remove(&self, item: &T) -> Result<bool> {
        let mut items = self.lock().await?;
        match items.iter().position(|existing| existing == item) {
            Some(idx) => {
                items.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns true if an equal item is present.
    pub async fn contains(&self, item: &T) -> Result<bool> {
        Ok(self.lock().await?.contains(item))
    }
}

impl<T: Clone> Registry<T> {
    /// Ordered copy of the current contents.
    pub async fn snapshot(&self) -> Result<Vec<T>> {
        Ok(self.lock().await?.clone())
    }
}
