//! The two server-held collections and their endpoint layout.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::query::{SortDirection, SortSpec};
use crate::row::RecordId;

/// A server-held record collection with its own grid view and push channel.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Collection {
    Vehicles,
    Persons,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushUrlError {
    #[error("API base must start with http:// or https://, got {0:?}")]
    UnsupportedScheme(String),
}

impl Collection {
    /// REST resource segment: `/api/<resource>/...`.
    pub fn resource(self) -> &'static str {
        match self {
            Self::Vehicles => "vehicle",
            Self::Persons => "person",
        }
    }

    /// Push channel segment: `/ws/<segment>`.
    pub fn push_segment(self) -> &'static str {
        match self {
            Self::Vehicles => "vehicles",
            Self::Persons => "persons",
        }
    }

    pub fn query_path(self) -> String {
        format!("/api/{}/query", self.resource())
    }

    pub fn collection_path(self) -> String {
        format!("/api/{}", self.resource())
    }

    pub fn record_path(self, id: RecordId) -> String {
        format!("/api/{}/{}", self.resource(), id)
    }

    /// Sort applied when a view mounts. The vehicle grid opens newest first.
    pub fn default_sort(self) -> SortSpec {
        match self {
            Self::Vehicles => SortSpec::new().then("id", SortDirection::Desc),
            Self::Persons => SortSpec::new(),
        }
    }

    /// Derive the WebSocket URL for this collection from the HTTP API base.
    ///
    /// `http://host/app/` → `ws://host/app/ws/vehicles`.
    pub fn push_url(self, api_base: &str) -> Result<String, PushUrlError> {
        let base = api_base.trim_end_matches('/');
        let rest = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(PushUrlError::UnsupportedScheme(api_base.to_string()));
        };
        Ok(format!("{rest}/ws/{}", self.push_segment()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_follows_api_scheme() {
        assert_eq!(
            Collection::Vehicles.push_url("http://localhost:8080/app/").unwrap(),
            "ws://localhost:8080/app/ws/vehicles"
        );
        assert_eq!(
            Collection::Persons.push_url("https://fleet.example").unwrap(),
            "wss://fleet.example/ws/persons"
        );
        assert!(matches!(
            Collection::Persons.push_url("ftp://fleet.example"),
            Err(PushUrlError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn endpoint_paths() {
        assert_eq!(Collection::Vehicles.query_path(), "/api/vehicle/query");
        assert_eq!(Collection::Persons.record_path(RecordId(7)), "/api/person/7");
        assert_eq!("persons".parse::<Collection>().unwrap(), Collection::Persons);
    }

    #[test]
    fn vehicles_default_to_newest_first() {
        let sort = Collection::Vehicles.default_sort();
        assert_eq!(sort.keys().len(), 1);
        assert_eq!(sort.keys()[0].field.as_str(), "id");
        assert_eq!(sort.keys()[0].direction, SortDirection::Desc);
        assert!(Collection::Persons.default_sort().is_empty());
    }
}
