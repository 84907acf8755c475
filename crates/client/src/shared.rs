//! Thread-safe client handle
//!
//! The region carries one operation at a time. `SharedClient` puts the client
//! behind a mutex so threads take turns for whole request/response rounds.

use crate::channel::{Channel, DeviceChannel};
use crate::client::TfaccClient;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tfacc_common::{Result, TfaccConfig, TfaccError};

/// Cloneable handle to one client
#[derive(Debug)]
pub struct SharedClient<C: Channel = DeviceChannel> {
    inner: Arc<Mutex<TfaccClient<C>>>,
}

impl SharedClient<DeviceChannel> {
    pub fn connect(config: &TfaccConfig) -> Result<Self> {
        Ok(Self::new(TfaccClient::connect(config)?))
    }
}

impl<C: Channel> SharedClient<C> {
    pub fn new(client: TfaccClient<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    /// Exclusive access until the guard drops
    pub fn lock(&self) -> MutexGuard<'_, TfaccClient<C>> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access
    pub fn with<R>(&self, f: impl FnOnce(&mut TfaccClient<C>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Number of live handles
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Shut the client down if this is the last handle
    pub fn try_shutdown(self) -> Result<()> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().shutdown(),
            Err(inner) => Err(TfaccError::internal(format!(
                "client still shared by {} other handles",
                Arc::strong_count(&inner) - 1
            ))),
        }
    }
}

impl<C: Channel> Clone for SharedClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
