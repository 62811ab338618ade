//! corral-provider — the pluggable compute backend contract.
//!
//! Defines the `Provider` trait the reconciler drives compute through,
//! the external (out-of-process) provider with its two structurally
//! versioned parameter shapes, and a deterministic fake provider for
//! tests.
//!
//! # Architecture
//!
//! ```text
//! Registry (name → factory)
//!   └── ProviderFactory::bind(pool, controller) → Arc<dyn Provider>
//!         ├── LegacyExternalProvider   (contract v0.1.0)
//!         ├── ExternalProviderV011     (contract v0.1.1)
//!         └── FakeProvider             (tests)
//! ```

mod error;
mod external;
mod fake;
mod provider;
mod registry;
mod v0_1_0;
mod v0_1_1;

pub use error::{ProviderError, ProviderResult};
pub use external::{ExternalRunner, NOT_FOUND_EXIT_CODE};
pub use fake::{FakeProvider, FakeProviderFactory};
pub use provider::{
    validate_provider_status, CreateInstanceParams, Provider, ProviderInstance,
};
pub use registry::{external_provider, ExternalProviderFactory, ProviderFactory, Registry};
pub use v0_1_0::LegacyExternalProvider;
pub use v0_1_1::ExternalProviderV011;
