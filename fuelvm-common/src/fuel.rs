//! Fuel: the virtual unit the runtime charges for every operation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, ErrorCode};

/// Virtual unit of measure for the work done by the runtime.
pub type Fuel = u64;

pub const FUEL_INSTANT_ACTION_AMOUNT: Fuel = 50;
pub const FUEL_QUICK_ACTION_AMOUNT: Fuel = 200;
pub const FUEL_FASTEST_ACTION_AMOUNT: Fuel = 400;
pub const FUEL_FAST_ACTION_AMOUNT: Fuel = 600;
pub const FUEL_MID_ACTION_AMOUNT: Fuel = 800;
pub const FUEL_SLOW_ACTION_AMOUNT: Fuel = 1200;
pub const FUEL_EXTREME_ACTION_AMOUNT: Fuel = 2500;
pub const FUEL_LONG_ACTION_AMOUNT: Fuel = 5000;
pub const FUEL_ABSOLUTE_ACTION_AMOUNT: Fuel = 10000;

pub const V_FUEL: Fuel = 1;
pub const V_KFUEL: Fuel = 1024;
pub const V_MFUEL: Fuel = V_KFUEL << 10;
pub const V_GFUEL: Fuel = V_MFUEL << 10;
pub const V_TFUEL: Fuel = V_GFUEL << 10;

/// Default capacity of the fuel tank.
pub const DEFAULT_FUEL_TANK_CAPACITY: Fuel = 100 * V_KFUEL;

/// Default interval between two refuels of the fuel station.
pub const DEFAULT_FUEL_REFILL_RATE: Duration = Duration::from_millis(400);

/// Default wall clock limit for a contract execution.
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(10);

/// Execution time buckets, ascending. An execution that fits in a bucket
/// costs the bucket's fuel.
const FUEL_AMOUNT_TABLE: [(Duration, Fuel); 7] = [
    (Duration::from_millis(100), FUEL_INSTANT_ACTION_AMOUNT),
    (Duration::from_millis(200), FUEL_QUICK_ACTION_AMOUNT),
    (Duration::from_millis(300), FUEL_FASTEST_ACTION_AMOUNT),
    (Duration::from_millis(500), FUEL_FAST_ACTION_AMOUNT),
    (Duration::from_millis(1000), FUEL_MID_ACTION_AMOUNT),
    (Duration::from_millis(2000), FUEL_SLOW_ACTION_AMOUNT),
    (Duration::from_millis(5000), FUEL_EXTREME_ACTION_AMOUNT),
];

/// Default amount refilled at every station tick: 5% of the capacity.
pub fn default_refill_amount(capacity: Fuel) -> Fuel {
    capacity * 5 / 100
}

/// Returns the cost of an action based only on its execution time.
pub fn fuel_amount(execution: Duration) -> Fuel {
    FUEL_AMOUNT_TABLE
        .iter()
        .find(|(limit, _)| execution <= *limit)
        .map(|(_, fuel)| *fuel)
        .unwrap_or(FUEL_LONG_ACTION_AMOUNT)
}

/// Returns the wall clock allowance for a contract declaring `fuel` as its
/// maximum consumption. Above the largest bucket `fallback` applies.
pub fn max_execution_time_from_fuel(fuel: Fuel, fallback: Duration) -> Duration {
    FUEL_AMOUNT_TABLE
        .iter()
        .find(|(_, amount)| fuel <= *amount)
        .map(|(limit, _)| *limit)
        .unwrap_or(fallback)
}

/// Parses a fuel quantity written as `<amount> <unit>`, for example
/// `10 vKFuel` (10 * 1024).
pub fn parse_fuel(raw: &str) -> Result<Fuel, AppError> {
    let mut parts = raw.split_whitespace();
    let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AppError::new(
            ErrorCode::Invalid,
            format!("invalid fuel format: {raw}"),
        ));
    };

    let amount: Fuel = amount
        .parse()
        .map_err(|_| AppError::invalid(format!("cannot parse fuel amount: {raw}")))?;

    let unit = match unit {
        "vFuel" => V_FUEL,
        "vKFuel" => V_KFUEL,
        "vMFuel" => V_MFUEL,
        "vGFuel" => V_GFUEL,
        "vTFuel" => V_TFUEL,
        _ => return Err(AppError::invalid(format!("invalid fuel unit: {raw}"))),
    };

    amount
        .checked_mul(unit)
        .ok_or_else(|| AppError::invalid(format!("fuel amount overflows: {raw}")))
}

/// Snapshot of the fuel tank.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelStat {
    pub fuel_capacity: Fuel,
    pub fuel_used: Fuel,
    pub last_refuel_amount: Fuel,
    /// Unix timestamp (seconds) of the last refuel, if any happened.
    pub last_refuel_at: Option<u64>,
}
