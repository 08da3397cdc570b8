//! Client facade.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`ClientBuilder`] fluent configuration |
//! | `config` | [`ClientConfig`] with serde defaults |
//! | `core` | [`RealtimeClient`] handle |
//! | `presets` | [`Role`] channel presets |

// ============================================================================
// Submodules
// ============================================================================

/// Client builder.
pub mod builder;

/// Client configuration.
pub mod config;

/// Client handle.
pub mod core;

/// Role presets.
pub mod presets;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use config::ClientConfig;
pub use core::{RealtimeClient, WeakClient};
pub use presets::Role;
