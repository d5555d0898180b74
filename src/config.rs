//! Sender configuration: WAL geometry constants and the runtime tunables.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// WAL geometry and per-connection tunables. Geometry constants are fixed
/// for the lifetime of a deployment; `max_senders` and `nap_delay_ms` are
/// reloadable via `ConfigSource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub max_senders: u32,
    pub nap_delay_ms: u64,
    pub seg_size: u32,
    pub page_size: u32,
    pub max_frame: u32,
    pub file_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        let seg_size = 16 * 1024 * 1024;
        Self {
            max_senders: 0,
            nap_delay_ms: 200,
            seg_size,
            page_size: 8192,
            max_frame: 128 * 1024,
            file_size: seg_size,
        }
    }
}

impl Config {
    /// Panics if the geometry constants violate the invariants relied on by
    /// the framer and log reader (see design note on the post-read
    /// `WalRemoved` check: the check only covers the start segment, which
    /// requires `max_frame <= seg_size`).
    pub fn validate(&self) {
        assert!(
            self.max_frame <= self.seg_size,
            "max_frame must not exceed seg_size"
        );
        assert!(
            self.max_frame >= self.page_size,
            "max_frame must be at least one page"
        );
        assert!(
            self.page_size > 0 && self.seg_size % self.page_size == 0,
            "seg_size must be a multiple of page_size"
        );
        assert!(
            self.file_size % self.seg_size == 0,
            "file_size must be a multiple of seg_size"
        );
    }

    pub fn new_validated(self) -> Self {
        self.validate();
        self
    }
}

/// Reload collaborator from the external-interfaces section: exposes the
/// current configuration and accepts a reload signal.
pub trait ConfigSource: Send + Sync + 'static {
    fn current(&self) -> Config;
    fn reload(&self);
}

/// Production `ConfigSource`, backed by a lock-free pointer swap.
pub struct ArcSwapConfigSource {
    inner: ArcSwap<Config>,
    reload_fn: Box<dyn Fn() -> Config + Send + Sync>,
}

impl ArcSwapConfigSource {
    pub fn new(initial: Config, reload_fn: impl Fn() -> Config + Send + Sync + 'static) -> Self {
        Self {
            inner: ArcSwap::from_pointee(initial),
            reload_fn: Box::new(reload_fn),
        }
    }

    pub fn fixed(config: Config) -> Self {
        Self::new(config, move || config)
    }
}

impl ConfigSource for ArcSwapConfigSource {
    fn current(&self) -> Config {
        **self.inner.load()
    }

    fn reload(&self) {
        let new = (self.reload_fn)();
        self.inner.store(Arc::new(new));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate();
    }

    #[test]
    #[should_panic]
    fn max_frame_larger_than_seg_size_panics() {
        let mut c = Config::default();
        c.max_frame = c.seg_size + 1;
        c.validate();
    }

    #[test]
    fn arc_swap_source_reloads() {
        let src = ArcSwapConfigSource::new(Config::default(), || {
            let mut c = Config::default();
            c.nap_delay_ms = 50;
            c
        });
        assert_eq!(src.current().nap_delay_ms, 200);
        src.reload();
        assert_eq!(src.current().nap_delay_ms, 50);
    }
}
