//! Build/runtime log reconstruction.

pub mod timing;
