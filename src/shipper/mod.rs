//! Workload-shipper client: consumer-addressed bundles of manifests.
//!
//! The shipper delivers manifest bundles to remote consumer clusters. The
//! engine talks to it through [`BundleClient`], which owns the
//! generation-gated apply algorithm and in-bundle discovery; the wire
//! driver itself sits behind the [`BundleStore`] seam so the gRPC protocol
//! stays an external collaborator. An HTTP control-plane store that rides
//! the retrying client ships here; tests use the in-memory store.

mod bundle;
mod client;
mod config;
mod store;

use miette::Diagnostic;
use thiserror::Error;

use crate::generation::GenerationError;
use crate::httpclient::ApiError;

pub use bundle::{Bundle, BundleSpec, ObjectMeta, BUNDLE_KIND};
pub use client::{ApplyReport, BundleClient};
pub use config::{ShipperConfig, ShipperConfigError, TlsAuth};
pub use store::{BundleStore, HttpBundleStore, InMemoryBundleStore};

/// Shipper-side failure. Not-found stays canonical so transports need no
/// backend-specific branching; dial failures pass through verbatim.
#[derive(Debug, Error, Diagnostic)]
pub enum ShipperError {
    #[error("bundle not found")]
    #[diagnostic(code(hyperfleet::shipper::not_found))]
    NotFound,

    #[error("bundle has no metadata.name")]
    #[diagnostic(code(hyperfleet::shipper::unnamed))]
    UnnamedBundle,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] GenerationError),

    #[error("failed to decode bundle payload: {0}")]
    #[diagnostic(code(hyperfleet::shipper::decode))]
    Decode(#[from] serde_json::Error),

    #[error("shipper api call failed")]
    #[diagnostic(code(hyperfleet::shipper::api))]
    Api(#[source] ApiError),

    /// Wire-level failure from the underlying dialer, verbatim.
    #[error("shipper dial failure: {0}")]
    #[diagnostic(code(hyperfleet::shipper::dial))]
    Dial(String),
}

impl ShipperError {
    pub(crate) fn from_api(err: ApiError) -> Self {
        if err.is_not_found() {
            ShipperError::NotFound
        } else {
            ShipperError::Api(err)
        }
    }
}
