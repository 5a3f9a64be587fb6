//! Two-slot loader pool for fast document switches
//!
//! Opening a document activates the idle slot while the outgoing slot's
//! cache is torn down on a background thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::loader::{ImageLoaderCore, LoaderOptions};
use crate::source::PageSource;

const SLOTS: usize = 2;

pub struct LoaderPool {
    slots: [ImageLoaderCore; SLOTS],
    active: Option<usize>,
    generation: u64,
    teardown: [Option<JoinHandle<()>>; SLOTS],
}

impl LoaderPool {
    pub fn new(config: &PipelineConfig, options: LoaderOptions) -> Self {
        Self {
            slots: [
                ImageLoaderCore::new(config, options.clone()),
                ImageLoaderCore::new(config, options),
            ],
            active: None,
            generation: 0,
            teardown: [None, None],
        }
    }

    /// Retire the active loader and arm the other slot for `source`
    pub fn open_document(&mut self, source: Arc<dyn PageSource>) -> &ImageLoaderCore {
        let target = match self.active {
            Some(slot) => {
                self.retire(slot);
                (slot + 1) % SLOTS
            }
            None => 0,
        };
        self.join_teardown(target);

        self.generation += 1;
        self.slots[target].activate(source, self.generation);
        self.active = Some(target);
        debug!(slot = target, generation = self.generation, "document opened");
        &self.slots[target]
    }

    /// The loader serving the open document
    pub fn active(&self) -> Option<&ImageLoaderCore> {
        self.active.map(|slot| &self.slots[slot])
    }

    pub fn active_slot(&self) -> Option<usize> {
        self.active
    }

    /// Generation of the most recently opened document
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Close the open document and wait for all teardown to finish
    pub fn close(&mut self) {
        if let Some(slot) = self.active.take() {
            self.retire(slot);
        }
        for slot in 0..SLOTS {
            self.join_teardown(slot);
        }
    }

    pub fn apply_config(&self, config: &PipelineConfig) {
        for loader in &self.slots {
            loader.apply_config(config);
        }
    }

    fn retire(&mut self, slot: usize) {
        let loader = self.slots[slot].clone();
        loader.invalidate();

        let background = loader.clone();
        match thread::Builder::new()
            .name(format!("pageflow-teardown-{slot}"))
            .spawn(move || background.reset())
        {
            Ok(handle) => self.teardown[slot] = Some(handle),
            Err(e) => {
                warn!(slot, error = %e, "failed to spawn teardown thread, resetting inline");
                loader.reset();
            }
        }
    }

    fn join_teardown(&mut self, slot: usize) {
        if let Some(handle) = self.teardown[slot].take() {
            if handle.join().is_err() {
                warn!(slot, "loader teardown panicked");
            }
        }
    }
}

impl Drop for LoaderPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LoaderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderPool")
            .field("active", &self.active)
            .field("generation", &self.generation)
            .finish()
    }
}
