//! # saltleads
//!
//! Lead capture backend for a CCTV installation business.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`pricing`], [`calendar`], [`wizard`] | Price table, bookable days, estimate wizard rules |
//! | [`chat`] | Chat session state machine and views |
//! | [`records`] | Service requests, contact forms, estimate follow-up |
//! | [`auth`] | Passwords, session tokens, registration rules |
//! | [`db`] | PostgreSQL storage and the outbox table |
//! | [`outbox`] | Retry loop delivering ledger writes and emails |
//! | [`ledger`] | Spreadsheet mirror (Google Sheets or in-memory) |
//! | [`notify`] | Email rendering and delivery |
//! | [`digest`] | Daily lead counts |
//! | [`dashboard`] | Axum router, extractors, background tasks |
//! | [`client`] | Typed HTTP client and chat poller |
//! | [`config`], [`error`], [`prom_metrics`] | Ambient plumbing |

pub mod auth;
pub mod calendar;
pub mod chat;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod digest;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod outbox;
pub mod pricing;
pub mod prom_metrics;
pub mod records;
pub mod wizard;
