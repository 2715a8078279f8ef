//! Player report tracking for a multiplayer game server.
//!
//! The host server pushes sessions, chat lines and command invocations through
//! the [`http`] bridge; [`service::ReportService`] answers with the
//! [`host::Effect`]s the host applies.

pub mod command;
pub mod config;
pub mod host;
pub mod http;
pub mod pagination;
pub mod report;
pub mod service;
pub mod settings;
pub mod store;
