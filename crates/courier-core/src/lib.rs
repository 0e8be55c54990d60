//! courier-core: action execution and named-user reconciliation.
//!
//! Two pipelines share one store:
//!
//! - **Actions.** An actions payload (a JSON object of name → value) is split
//!   into one [`ActionRunner`](action::ActionRunner) call per entry. The
//!   [`ActionCoordinator`](action::ActionCoordinator) tells its host once every
//!   action in the batch has completed.
//! - **Identity.** [`NamedUser`](named_user::NamedUser) persists the named
//!   user id under a change token and schedules reconciliation jobs on the
//!   [`JobDispatcher`](job::JobDispatcher). Jobs re-read current state when
//!   they run and discard work captured under a superseded token.
//!
//! [`Courier`] wires both around a [`KeyValueStore`](store::KeyValueStore).

pub mod action;
pub mod channel;
pub mod config;
pub mod courier;
pub mod error;
pub mod io;
pub mod job;
pub mod ledger;
pub mod named_user;
pub mod paths;
pub mod remote;
pub mod store;

pub use courier::Courier;
pub use error::{CourierError, Result};
