//! Shared types for the fleetgrid console.
//!
//! These are the nouns every other crate speaks: rows as the server returns them,
//! the typed sort/filter model the grid edits, the wire contract sent to the
//! row-range query endpoint, and the record bodies accepted by the write endpoints.
//!
//! Nothing here performs I/O.

pub mod collection;
pub mod query;
pub mod records;
pub mod row;

pub use collection::{Collection, PushUrlError};
pub use query::{
    DateOp, FieldPath, FilterModelEntry, FilterSpec, NumberOp, Predicate, QueryContract,
    QueryResponse, Signature, SortDirection, SortKey, SortModelEntry, SortSpec, TextOp,
};
pub use records::{Coordinates, FuelType, Person, PersonSummary, Vehicle, VehicleType};
pub use row::{RecordId, Row};
