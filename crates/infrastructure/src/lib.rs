//! Infrastructure adapters for the executor.
//!
//! Everything that talks to the outside world lives here: the Kubernetes
//! client plumbing (pod exec file I/O, the runtime state accessor, manifest
//! builders, the maintenance lease) and the S3 artifact store, plus the
//! `script(1)` timing decoder used to reconstruct timestamped build logs.

pub mod kube;
pub mod logs;
pub mod storage;
