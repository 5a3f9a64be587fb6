//! Reader session: the context object tying loaders, preload and upscale
//! together for one reader window

use std::sync::Arc;

use pageflow_cache::PageIndex;
use pageflow_scheduler::{Direction, PreloadStrategy};
use tracing::{debug, info};

use crate::config::{ConfigError, PipelineConfig, SharedConfig};
use crate::error::LoadError;
use crate::loader::{ImageLoaderCore, LoadHandle, LoaderOptions, PreloadSummary};
use crate::pool::LoaderPool;
use crate::source::PageSource;
use crate::upscale::UpscaleHandler;

/// Result of moving to a page
#[derive(Debug, Clone)]
pub struct Navigation {
    pub index: PageIndex,
    pub direction: Direction,
    /// Load of the page itself
    pub handle: LoadHandle,
    pub preload: PreloadSummary,
}

#[derive(Debug)]
pub struct ReaderSession {
    config: SharedConfig,
    pool: LoaderPool,
    strategy: PreloadStrategy,
    upscale: Option<Arc<UpscaleHandler>>,
    current: Option<PageIndex>,
}

impl ReaderSession {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Self::with_options(config, LoaderOptions::default())
    }

    pub fn with_options(
        config: PipelineConfig,
        options: LoaderOptions,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let upscale = options.upscale.clone();
        if let Some(handler) = &upscale {
            handler.set_enabled(config.upscale_enabled);
            handler.apply_settings(config.upscale.clone());
        }
        Ok(Self {
            pool: LoaderPool::new(&config, options),
            config: SharedConfig::new(config),
            strategy: PreloadStrategy::new(),
            upscale,
            current: None,
        })
    }

    /// Switch to a new document
    pub fn open(&mut self, source: Arc<dyn PageSource>) -> &ImageLoaderCore {
        if let Some(handler) = &self.upscale {
            handler.clear();
        }
        self.strategy.reset();
        self.current = None;
        let loader = self.pool.open_document(source);
        info!(pages = loader.page_count(), "opened document");
        loader
    }

    /// Show `index`: load it first, cancel upscale work for the page left
    /// behind, then preload around it.
    ///
    /// Blocks until the immediate tier is resident.
    pub fn goto_page(&mut self, index: PageIndex) -> Result<Navigation, LoadError> {
        let loader = self.pool.active().ok_or(LoadError::Invalidated)?.clone();
        if index >= loader.page_count() {
            return Err(LoadError::PageNotFound { index });
        }

        let direction = self.strategy.track_page_direction(index);
        if let (Some(previous), Some(handler)) = (self.current, &self.upscale) {
            handler.on_page_changed(previous, index);
        }
        self.current = Some(index);

        let handle = loader.load_current_page(index);
        let preload = loader.smart_preload(index, direction);
        debug!(
            page = index,
            direction = direction.as_str(),
            scheduled = preload.scheduled,
            "navigated"
        );
        Ok(Navigation {
            index,
            direction,
            handle,
            preload,
        })
    }

    /// Edit the configuration and apply it to every component.
    ///
    /// Nothing changes if the edited configuration is invalid.
    pub fn update_config<F>(&mut self, edit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PipelineConfig),
    {
        let mut next = self.config.snapshot();
        edit(&mut next);
        next.validate()?;

        self.pool.apply_config(&next);
        if let Some(handler) = &self.upscale {
            handler.set_enabled(next.upscale_enabled);
            handler.apply_settings(next.upscale.clone());
        }
        self.config.replace(next);
        debug!("configuration updated");
        Ok(())
    }

    pub fn loader(&self) -> Option<&ImageLoaderCore> {
        self.pool.active()
    }

    pub fn current_page(&self) -> Option<PageIndex> {
        self.current
    }

    pub fn direction(&self) -> Direction {
        self.strategy.direction()
    }

    pub fn config(&self) -> PipelineConfig {
        self.config.snapshot()
    }

    /// Shared handle to the live configuration
    pub fn shared_config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn upscale(&self) -> Option<&Arc<UpscaleHandler>> {
        self.upscale.as_ref()
    }

    /// Close the document and wait for teardown
    pub fn close(&mut self) {
        if let Some(handler) = &self.upscale {
            handler.clear();
        }
        self.pool.close();
        self.strategy.reset();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryPageSource;

    fn source(pages: usize) -> Arc<dyn PageSource> {
        Arc::new(MemoryPageSource::new(
            (0..pages).map(|i| vec![i as u8; 32]).collect(),
        ))
    }

    #[test]
    fn test_goto_page_tracks_direction() {
        let mut session = ReaderSession::new(PipelineConfig::default()).unwrap();
        session.open(source(20));

        let nav = session.goto_page(5).unwrap();
        assert_eq!(nav.direction, Direction::Forward);
        assert_eq!(nav.preload.loaded_immediately, 1);
        assert_eq!(nav.handle.wait().unwrap().index, 5);

        let nav = session.goto_page(3).unwrap();
        assert_eq!(nav.direction, Direction::Backward);
        assert_eq!(nav.preload.plan.next_high, vec![2]);
        assert_eq!(session.current_page(), Some(3));
    }

    #[test]
    fn test_goto_page_out_of_range() {
        let mut session = ReaderSession::new(PipelineConfig::default()).unwrap();
        assert_eq!(session.goto_page(0).unwrap_err(), LoadError::Invalidated);

        session.open(source(2));
        assert_eq!(
            session.goto_page(2).unwrap_err(),
            LoadError::PageNotFound { index: 2 }
        );
        assert_eq!(session.current_page(), None);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PipelineConfig {
            concurrency: 0,
            ..PipelineConfig::default()
        };
        assert!(ReaderSession::new(config).is_err());

        let mut session = ReaderSession::new(PipelineConfig::default()).unwrap();
        assert!(session.update_config(|c| c.forward_ratio = 2.0).is_err());
        assert_eq!(session.config().forward_ratio, 0.7);
    }

    #[test]
    fn test_update_config_reaches_loader() {
        let mut session = ReaderSession::new(PipelineConfig::default()).unwrap();
        let loader = session.open(source(4)).clone();
        session
            .update_config(|c| {
                c.concurrency = 1;
                c.preload_size = 0;
            })
            .unwrap();
        assert_eq!(loader.queue_stats().concurrency, 1);

        let nav = session.goto_page(1).unwrap();
        assert!(nav.preload.plan.normal.is_empty());
        assert_eq!(session.config().preload_size, 0);
    }

    #[test]
    fn test_open_resets_direction() {
        let mut session = ReaderSession::new(PipelineConfig::default()).unwrap();
        session.open(source(10));
        session.goto_page(6).unwrap();
        session.goto_page(2).unwrap();
        assert_eq!(session.direction(), Direction::Backward);

        session.open(source(10));
        assert_eq!(session.direction(), Direction::Forward);
        assert_eq!(session.current_page(), None);
        session.close();
        assert!(session.loader().is_none());
    }
}
