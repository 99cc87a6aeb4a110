//! Record bodies accepted by the write endpoints.
//!
//! Field validation happens server-side; a rejected body comes back as a
//! `400` that the client surfaces verbatim.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::row::RecordId;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum VehicleType {
    Car,
    Helicopter,
    Motorcycle,
    Chopper,
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum FuelType {
    Kerosene,
    Manpower,
    Nuclear,
}

/// `x` is capped at 613 and `y` at 962 by the server.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: String,
    pub coordinates: Coordinates,
    #[serde(rename = "type")]
    pub vehicle_type: VehicleType,
    pub engine_power: Option<i32>,
    pub number_of_wheels: i32,
    pub capacity: Option<i32>,
    pub distance_travelled: Option<i32>,
    pub fuel_consumption: f32,
    pub fuel_type: FuelType,
    pub owner_id: RecordId,
    /// Assigned by the server; ignored on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub full_name: String,
}

/// Search hit used when picking a replacement owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonSummary {
    pub id: RecordId,
    pub full_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vehicle_body_uses_server_field_names() {
        let vehicle = Vehicle {
            id: None,
            name: "Mi-8".into(),
            coordinates: Coordinates { x: 10.0, y: 20.0 },
            vehicle_type: VehicleType::Helicopter,
            engine_power: Some(1500),
            number_of_wheels: 0,
            capacity: None,
            distance_travelled: Some(100),
            fuel_consumption: 12.5,
            fuel_type: FuelType::Kerosene,
            owner_id: RecordId(9),
            creation_date: None,
        };
        let value = serde_json::to_value(&vehicle).unwrap();
        assert_eq!(value["type"], json!("HELICOPTER"));
        assert_eq!(value["fuelType"], json!("KEROSENE"));
        assert_eq!(value["ownerId"], json!(9));
        assert_eq!(value["coordinates"]["x"], json!(10.0));
        assert!(value.get("id").is_none());
    }

    #[test]
    fn enum_parsing_is_case_insensitive() {
        assert_eq!("car".parse::<VehicleType>().unwrap(), VehicleType::Car);
        assert_eq!(VehicleType::Motorcycle.to_string(), "MOTORCYCLE");
        assert_eq!("NUCLEAR".parse::<FuelType>().unwrap(), FuelType::Nuclear);
    }
}
