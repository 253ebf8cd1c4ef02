//! Configuration module.
//!
//! Runtime settings for installs and invocations.

mod settings;

pub use settings::{default_cache_dir, Settings, ENV_CACHE_DIR, ENV_DEBUG, ENV_SIGNING_KEY};
