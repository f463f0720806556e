//! Per-type entity stores and per-operation request/metadata stores.

pub(crate) mod entity;
pub(crate) mod request;
