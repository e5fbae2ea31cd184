//! Sector-buffer pool and the node handle budget.
//!
//! The original C implementation keeps a fixed-size array of command
//! contexts and a fixed-size array of node descriptors, both handed out from
//! static pools so the driver never allocates on the hot path. Here the
//! sector buffers are still pool-backed (`Pool`/`CommandContext`), but node
//! handles are ordinary heap values guarded by a budget counter
//! ([`NodeGuard`]) rather than literal slots, since [`hyrax_fs::FileSystem::Node`]
//! must be [`Clone`].

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use hyrax_ds::DataStorage;
use hyrax_fs::{Error, FsError, Result};
use log::error;

use crate::consts::RESERVED_SECTOR;
use crate::Inner;

pub(crate) struct Pool {
    free: Vec<Box<[u8]>>,
}

impl Pool {
    pub(crate) fn new(capacity: usize, sector_size: usize) -> Self {
        Self {
            free: (0..capacity)
                .map(|_| vec![0u8; sector_size].into_boxed_slice())
                .collect(),
        }
    }

    fn acquire(&mut self) -> Option<Box<[u8]>> {
        self.free.pop()
    }

    fn release(&mut self, buffer: Box<[u8]>) {
        self.free.push(buffer);
    }
}

/// A single pooled sector buffer, write-through on rebind and on drop.
pub(crate) struct CommandContext<'h, DS: DataStorage> {
    inner: &'h Inner<DS>,
    sector: u32,
    buffer: Option<Box<[u8]>>,
    dirty: bool,
}

impl<'h, DS: DataStorage> CommandContext<'h, DS> {
    pub(crate) fn acquire(inner: &'h Inner<DS>, sector: u32) -> Result<Self> {
        let buffer = inner
            .pool
            .lock()
            .unwrap()
            .acquire()
            .ok_or(Error::Fs(FsError::Memory))?;
        let mut context = Self {
            inner,
            sector: RESERVED_SECTOR,
            buffer: Some(buffer),
            dirty: false,
        };
        context.bind(sector)?;
        Ok(context)
    }

    /// Switches the context to another sector, flushing the previous one if
    /// it was written to.
    pub(crate) fn bind(&mut self, sector: u32) -> Result<()> {
        if self.sector == sector {
            return Ok(());
        }
        self.flush()?;
        let buffer = self.buffer.as_mut().expect("buffer taken while bound");
        self.inner
            .data_storage
            .read(
                (sector as u64) << self.inner.geometry.bytes_per_sector_log2,
                buffer,
            )
            .map_err(crate::map_ds_err)?;
        self.sector = sector;
        Ok(())
    }

    pub(crate) fn sector(&self) -> u32 {
        self.sector
    }

    pub(crate) fn buffer(&self) -> &[u8] {
        self.buffer.as_deref().expect("buffer taken while bound")
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        self.buffer
            .as_deref_mut()
            .expect("buffer taken while bound")
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if !self.dirty || self.sector == RESERVED_SECTOR {
            return Ok(());
        }
        let buffer = self.buffer.as_deref().expect("buffer taken while bound");
        self.inner
            .data_storage
            .write(
                (self.sector as u64) << self.inner.geometry.bytes_per_sector_log2,
                buffer,
            )
            .map_err(crate::map_ds_err)?;
        self.dirty = false;
        Ok(())
    }
}

impl<'h, DS: DataStorage> Drop for CommandContext<'h, DS> {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            error!("Failed to flush sector {} on release: {error}", self.sector);
        }
        if let Some(buffer) = self.buffer.take() {
            self.inner.pool.lock().unwrap().release(buffer);
        }
    }
}

/// Releases one slot of the node handle budget when the last clone of a
/// [`crate::FatNode`] sharing it is dropped.
pub(crate) struct NodeGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn acquire_node_guard(
    counter: &Arc<AtomicUsize>,
    capacity: usize,
) -> Result<Arc<NodeGuard>> {
    loop {
        let current = counter.load(Ordering::SeqCst);
        if current >= capacity {
            return Err(Error::Fs(FsError::Memory));
        }
        if counter
            .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Ok(Arc::new(NodeGuard {
                counter: counter.clone(),
            }));
        }
    }
}
