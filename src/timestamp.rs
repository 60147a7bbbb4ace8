use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// A Unix timestamp represented as a `u64`, used for transaction creation times
/// and price feed publish times.
///
/// This type encodes the number of seconds since the Unix epoch (1970-01-01T00:00:00Z).
/// The lazy-expiry policy compares a transaction's creation timestamp against the
/// current time to decide whether a pending record has gone stale.
///
/// Serialized as a stringified integer to avoid loss of precision in JSON.
/// For example, `1699999999` becomes `"1699999999"` in the wire format.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixTimestamp(ts))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0 + rhs)
    }
}

impl Add<Duration> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        UnixTimestamp(self.0 + rhs.as_secs())
    }
}

impl UnixTimestamp {
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_secs();
        Self(now)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed between `earlier` and `self`, saturating at zero if
    /// `earlier` is in the future (clock skew between writers).
    pub fn duration_since(&self, earlier: UnixTimestamp) -> Duration {
        Duration::from_secs(self.0.saturating_sub(earlier.0))
    }
}

/// Source of the current time.
///
/// The lifecycle manager reads the clock through this trait so that expiry
/// behavior is testable without sleeping or mocking the system clock globally.
pub trait Clock: Send + Sync {
    fn now(&self) -> UnixTimestamp;
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimestamp {
        UnixTimestamp::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_serializes_as_string() {
        let ts = UnixTimestamp::from_secs(1699999999);
        let serialized = serde_json::to_string(&ts).unwrap();
        assert_eq!(serialized, "\"1699999999\"");
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let original = UnixTimestamp::from_secs(42);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: UnixTimestamp = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_duration_since() {
        let earlier = UnixTimestamp::from_secs(100);
        let later = UnixTimestamp::from_secs(700);
        assert_eq!(later.duration_since(earlier), Duration::from_secs(600));
    }

    #[test]
    fn test_duration_since_saturates() {
        let earlier = UnixTimestamp::from_secs(700);
        let later = UnixTimestamp::from_secs(100);
        assert_eq!(later.duration_since(earlier), Duration::from_secs(0));
    }
}
