//! Data models for the U8s training scheduler.
//!
//! Field names serialize as camelCase to match the web client.

mod access;
mod activity;
mod invite;
mod notification;
mod profile;
mod rsvp;
mod session;
mod team;

pub use access::*;
pub use activity::*;
pub use invite::*;
pub use notification::*;
pub use profile::*;
pub use rsvp::*;
pub use session::*;
pub use team::*;
