//! Named operations for the console's toolbar.
//!
//! Every operation follows the same order: edit sort/filter state, purge the
//! cache, scroll to row 0, request the window from there.
//!
//! Filter presets first ask the server's matching special endpoint and leave
//! the grid alone when that call fails.

use std::sync::Arc;

use fleetgrid_types::{Collection, FilterSpec, NumberOp, Predicate, Row, TextOp, VehicleType};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::VehicleSelection;
use crate::error::ClientError;
use crate::view::{DataView, RowsOutcome};

#[derive(Debug, Error, PartialEq)]
pub enum PresetError {
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} range bounds must be non-zero")]
    ZeroBound { field: &'static str },
    #[error("range minimum {min} is greater than maximum {max}")]
    InvertedRange { min: f64, max: f64 },
    #[error("preset only applies to the vehicle view, not {0}")]
    WrongCollection(Collection),
    #[error(transparent)]
    Backend(#[from] ClientError),
}

/// Control handle for one [`DataView`]. Cheap to clone.
#[derive(Clone)]
pub struct ViewControls {
    view: Arc<DataView>,
}

impl ViewControls {
    pub fn new(view: Arc<DataView>) -> Self {
        Self { view }
    }

    pub fn view(&self) -> &Arc<DataView> {
        &self.view
    }

    /// Purge and reload from the top, keeping sort and filter.
    pub async fn refresh(&self) -> RowsOutcome {
        info!(collection = %self.view.collection(), "refresh");
        self.view.update_query(|_, _| {});
        self.view.restart_from_top().await
    }

    pub async fn clear_filters(&self) -> RowsOutcome {
        info!(collection = %self.view.collection(), "clear filters");
        self.view.update_query(|_, filter| *filter = FilterSpec::new());
        self.view.restart_from_top().await
    }

    /// Replace the whole filter model.
    pub async fn apply_filter(&self, predicates: FilterSpec) -> RowsOutcome {
        info!(collection = %self.view.collection(), columns = predicates.len(), "apply filter");
        self.view.update_query(|_, filter| *filter = predicates);
        self.view.restart_from_top().await
    }

    /// `fuelConsumption > threshold`.
    pub async fn apply_fuel_consumption_above(&self, threshold: f64) -> Result<RowsOutcome, PresetError> {
        self.require_vehicles()?;
        positive("fuelConsumption", threshold)?;
        self.select(VehicleSelection::FuelConsumptionAbove(threshold)).await?;
        let filter = FilterSpec::new().with("fuelConsumption", Predicate::number(NumberOp::GreaterThan, threshold));
        Ok(self.apply_filter(filter).await)
    }

    /// `type == vehicle_type`.
    pub async fn apply_type_equals(&self, vehicle_type: VehicleType) -> Result<RowsOutcome, PresetError> {
        self.require_vehicles()?;
        self.select(VehicleSelection::TypeEquals(vehicle_type)).await?;
        let filter = FilterSpec::new().with("type", Predicate::text(TextOp::Equals, vehicle_type.to_string()));
        Ok(self.apply_filter(filter).await)
    }

    /// `min <= enginePower <= max`. Neither bound may be zero.
    pub async fn apply_engine_power_between(&self, min: f64, max: f64) -> Result<RowsOutcome, PresetError> {
        self.require_vehicles()?;
        finite("enginePower", min)?;
        finite("enginePower", max)?;
        if min == 0.0 || max == 0.0 {
            return Err(PresetError::ZeroBound { field: "enginePower" });
        }
        if min > max {
            return Err(PresetError::InvertedRange { min, max });
        }
        self.select(VehicleSelection::EnginePowerBetween { min, max }).await?;
        let filter = FilterSpec::new().with("enginePower", Predicate::number_range(min, max));
        Ok(self.apply_filter(filter).await)
    }

    /// Number of vehicles with `fuelConsumption > threshold`. Grid state is untouched.
    pub async fn count_fuel_consumption_above(&self, threshold: f64) -> Result<u64, PresetError> {
        self.require_vehicles()?;
        positive("fuelConsumption", threshold)?;
        let count = self.view.backend().count_fuel_consumption_above(threshold).await?;
        info!(threshold, count, "counted vehicles above fuel threshold");
        Ok(count)
    }

    /// The vehicle with the smallest recorded distance, if any has one.
    pub async fn min_distance_vehicle(&self) -> Result<Option<Row>, PresetError> {
        self.require_vehicles()?;
        Ok(self.view.backend().min_distance_vehicle().await?)
    }

    async fn select(&self, selection: VehicleSelection) -> Result<(), PresetError> {
        match self.view.backend().select_vehicles(selection).await {
            Ok(matches) => {
                debug!(?selection, matched = matches.as_array().map(Vec::len), "preset selection confirmed");
                Ok(())
            }
            Err(e) => {
                warn!(?selection, error = %e, "preset selection failed; filter unchanged");
                Err(e.into())
            }
        }
    }

    fn require_vehicles(&self) -> Result<(), PresetError> {
        match self.view.collection() {
            Collection::Vehicles => Ok(()),
            other => Err(PresetError::WrongCollection(other)),
        }
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), PresetError> {
    if value.is_finite() { Ok(()) } else { Err(PresetError::NotFinite { field, value }) }
}

fn positive(field: &'static str, value: f64) -> Result<(), PresetError> {
    finite(field, value)?;
    if value > 0.0 { Ok(()) } else { Err(PresetError::NotPositive { field, value }) }
}
