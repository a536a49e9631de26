//! Command implementations

pub(crate) mod audit;
pub(crate) mod common;
pub(crate) mod dag;
pub(crate) mod diff;
pub(crate) mod evaluate;
pub(crate) mod info;
pub(crate) mod invalidate;
pub(crate) mod janitor;
pub(crate) mod migrate;
pub(crate) mod plan;
pub(crate) mod run;
