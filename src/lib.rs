//! Admission webhook that short-circuits Kubeflow Pipelines steps whose execution is already
//! cached.
//!
//! Every eligible pod gets a content-derived cache key. When the cache store knows the key, the
//! pod's containers are swapped for a no-op and the cached outputs are handed to Argo instead.

pub mod common;
pub mod config;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod mutation;
pub mod patch;
pub mod server;
pub mod store;
