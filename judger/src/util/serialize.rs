//! Serde helpers for the judge report wire format.

use std::time::Duration;

use serde::{Serialize, Serializer};

/// Serialize a [`Duration`] as whole milliseconds.
pub fn duration_ms<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(d.as_millis() as u64)
}

/// Serialize an optional [`Duration`] as whole milliseconds.
pub fn opt_duration_ms<S>(d: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    d.map(|d| d.as_millis() as u64).serialize(serializer)
}
