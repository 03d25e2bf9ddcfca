//! Clock helpers shared across Parley crates: record stamping, token
//! deadlines and interval sleeps all read time through here.

pub mod time_utils;

pub use time_utils::{
    current_unix_timestamp_ms, deadline_after_ms, duration_until_ms, is_past_deadline_ms,
};
