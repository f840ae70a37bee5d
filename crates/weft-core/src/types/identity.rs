use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical stores sharing the history-sync design.
///
/// Each store is an independent SQLite file with its own log and its own
/// set of checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreId {
    Main,
    Media,
}

impl StoreId {
    pub const ALL: [StoreId; 2] = [StoreId::Main, StoreId::Media];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreId::Main => "main",
            StoreId::Media => "media",
        }
    }

    /// File name of the store inside the shared container directory
    pub fn file_name(&self) -> String {
        format!("{}.sqlite", self.as_str())
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown store '{}'", s))
    }
}

/// Processes that read the shared log and keep their own cache.
///
/// The set is closed: pruning waits for every member, so a consumer that is
/// never started blocks pruning forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsumerIdentity {
    /// The main application process
    Primary,
    /// Share extension process
    ShareExtension,
    /// Notification service extension process
    NotificationExtension,
}

impl ConsumerIdentity {
    pub const ALL: [ConsumerIdentity; 3] = [
        ConsumerIdentity::Primary,
        ConsumerIdentity::ShareExtension,
        ConsumerIdentity::NotificationExtension,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerIdentity::Primary => "primary",
            ConsumerIdentity::ShareExtension => "share-extension",
            ConsumerIdentity::NotificationExtension => "notification-extension",
        }
    }
}

impl fmt::Display for ConsumerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsumerIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsumerIdentity::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown consumer '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_round_trips_through_str() {
        for consumer in ConsumerIdentity::ALL {
            assert_eq!(consumer.as_str().parse::<ConsumerIdentity>(), Ok(consumer));
        }
        assert!("widget".parse::<ConsumerIdentity>().is_err());
    }

    #[test]
    fn test_serde_names_match_as_str() {
        let json = serde_json::to_string(&ConsumerIdentity::ShareExtension).unwrap();
        assert_eq!(json, "\"share-extension\"");
        let json = serde_json::to_string(&StoreId::Media).unwrap();
        assert_eq!(json, "\"media\"");
        assert_eq!(StoreId::Main.file_name(), "main.sqlite");
    }
}
