use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Fuel sold at a station. Each fuel has its own price table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FuelType {
    Petrol,
    Diesel,
    Kerosene,
}

impl FuelType {
    /// Name of the backend table holding this fuel's prices
    pub fn table(&self) -> &'static str {
        match self {
            FuelType::Petrol => "petrol_prices",
            FuelType::Diesel => "diesel_prices",
            FuelType::Kerosene => "kerosene_prices",
        }
    }

    /// All fuels in display order: petrol, diesel, kerosene
    pub fn all() -> impl Iterator<Item = FuelType> {
        FuelType::iter()
    }

    pub fn label(&self) -> &'static str {
        match self {
            FuelType::Petrol => "Petrol",
            FuelType::Diesel => "Diesel",
            FuelType::Kerosene => "Kerosene",
        }
    }
}
