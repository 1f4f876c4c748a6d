//! # Shiftplan Backend
//!
//! Multi-tenant shift-planning engine for clinical teams.
//!
//! The core of the crate is the schedule solver: a constraint model over
//! discrete time intervals (overlap, location, rest-day, working-hours, and
//! gap semantics) driven by a parallel search with a layered weighted
//! objective. Around it sit the solver orchestrator (isolated worker,
//! heartbeat liveness, cooperative and forced abort, incremental progress
//! streaming), the state normalizer that canonicalizes persisted schedule
//! documents, and a strict RFC 5545 iCalendar feed generator.
//!
//! ## Architecture
//!
//! - [`api`]: request/response DTOs and the progress event contract
//! - [`models`]: canonical schedule document and time primitives
//! - [`normalize`]: migration of legacy document shapes into the canonical
//!   schema
//! - [`solver`]: slot contexts, model builder, search engine, solve driver
//! - [`services`]: solver host (process-wide orchestration) and progress bus
//! - [`ical`]: iCalendar serialization of published schedules
//! - [`publication`]: feed tokens and HTTP cache validators
//! - [`db`]: repository traits and the in-memory backend
//! - [`http`]: axum server surface (feature `http-server`)

pub mod api;
pub mod db;
pub mod ical;
pub mod models;
pub mod normalize;
pub mod publication;
pub mod services;
pub mod solver;

#[cfg(feature = "http-server")]
pub mod http;
