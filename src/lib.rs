#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub(crate) mod clients;
pub mod config;
pub mod error;
pub(crate) mod lifecycle;
pub mod observability;
pub(crate) mod queue;
pub mod scheduler;
pub(crate) mod store;
pub(crate) mod util;
