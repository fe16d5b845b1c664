//! Mapping of bike-profile and state-of-charge payloads into a [`BikeSnapshot`].
//!
//! Every field is optional: anything the provider omits or sends as `null`
//! stays `None` rather than turning into a plausible-looking zero.

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    serde_json::Value,
};

/// Assist modes in the order the provider reports live range estimates.
pub const ASSIST_MODES: [&str; 4] = ["eco", "tour", "sport", "turbo"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeEstimate {
    pub mode: String,
    pub distance_km: u32,
}

/// Raw lock and alarm flags as reported by the drive unit and connect module.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LockState {
    pub is_locked: Option<bool>,
    pub lock_enabled: Option<bool>,
    pub alarm_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentInfo {
    pub product_name: Option<String>,
    pub software_version: Option<String>,
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Components {
    pub drive_unit: ComponentInfo,
    pub battery: ComponentInfo,
    pub connected_module: ComponentInfo,
    pub remote_control: ComponentInfo,
}

/// Telemetry for one bike at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BikeSnapshot {
    pub bike_id: String,
    /// State of charge in percent.
    pub battery_level: Option<f64>,
    pub remaining_energy_wh: Option<f64>,
    pub remaining_energy_rider_wh: Option<f64>,
    pub total_capacity_wh: Option<f64>,
    pub charging: Option<bool>,
    pub charger_connected: Option<bool>,
    pub odometer_m: Option<u64>,
    pub charge_cycles: Option<f64>,
    pub delivered_lifetime_wh: Option<f64>,
    /// Highest estimate first.
    pub range_estimates: Vec<RangeEstimate>,
    pub lock: LockState,
    pub components: Components,
    /// When the connect module last uploaded live data.
    pub last_update: Option<DateTime<Utc>>,
    pub live_data_available: bool,
    pub fetched_at: DateTime<Utc>,
}

impl BikeSnapshot {
    pub fn is_charging(&self) -> bool {
        self.charging.unwrap_or(false)
    }

    pub fn max_range_km(&self) -> Option<u32> {
        self.range_estimates.first().map(|r| r.distance_km)
    }

    /// Last non-zero estimate, or 0 when every mode reports 0.
    pub fn min_range_km(&self) -> Option<u32> {
        if self.range_estimates.is_empty() {
            return None;
        }
        Some(
            self.range_estimates
                .iter()
                .rev()
                .map(|r| r.distance_km)
                .find(|km| *km != 0)
                .unwrap_or(0),
        )
    }

    pub fn odometer_km(&self) -> Option<f64> {
        self.odometer_m
            .map(|m| (m as f64 / 1000.0 * 100.0).round() / 100.0)
    }
}

/// Build a snapshot from the bike profile and, when the bike is online, its
/// live state of charge.
///
/// Live values only fill what the profile left empty, except for range
/// estimates, rider energy and the odometer, which the live payload replaces.
pub fn combine(
    bike_id: &str,
    profile: &Value,
    live: Option<&Value>,
    fetched_at: DateTime<Utc>,
) -> BikeSnapshot {
    let battery = profile
        .get("batteries")
        .and_then(Value::as_array)
        .and_then(|b| b.first())
        .unwrap_or(&Value::Null);
    let drive_unit = object(profile, "driveUnit");
    let connected_module = object(profile, "connectedModule");
    let lock = object(drive_unit, "lock");

    let mut snapshot = BikeSnapshot {
        bike_id: bike_id.to_string(),
        battery_level: number(battery, "batteryLevel"),
        remaining_energy_wh: number(battery, "remainingEnergy"),
        remaining_energy_rider_wh: None,
        total_capacity_wh: number(battery, "totalEnergy"),
        charging: flag(battery, "isCharging"),
        charger_connected: flag(battery, "isChargerConnected"),
        odometer_m: unsigned(drive_unit, "totalDistanceTraveled"),
        charge_cycles: number(object(battery, "numberOfFullChargeCycles"), "total"),
        delivered_lifetime_wh: number(battery, "deliveredWhOverLifetime"),
        range_estimates: profile_ranges(drive_unit),
        lock: LockState {
            is_locked: flag(lock, "isLocked"),
            lock_enabled: flag(lock, "isEnabled"),
            alarm_enabled: flag(connected_module, "isAlarmFeatureEnabled"),
        },
        components: Components {
            drive_unit: component(drive_unit),
            battery: component(battery),
            connected_module: component(connected_module),
            remote_control: component(object(profile, "remoteControl")),
        },
        last_update: None,
        live_data_available: false,
        fetched_at,
    };

    let Some(live) = live.filter(|v| v.is_object()) else {
        return snapshot;
    };

    snapshot.live_data_available = true;
    snapshot.last_update = live
        .get("stateOfChargeLatestUpdate")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    snapshot.battery_level = snapshot
        .battery_level
        .or_else(|| number(live, "stateOfCharge"));
    snapshot.charging = snapshot.charging.or_else(|| flag(live, "chargingActive"));
    snapshot.charger_connected = snapshot
        .charger_connected
        .or_else(|| flag(live, "chargerConnected"));
    snapshot.range_estimates = live_ranges(live);
    snapshot.remaining_energy_rider_wh = number(live, "remainingEnergyForRider");
    if let Some(odometer) = unsigned(live, "odometer") {
        snapshot.odometer_m = Some(odometer);
    }
    snapshot
}

fn profile_ranges(drive_unit: &Value) -> Vec<RangeEstimate> {
    let mut modes: Vec<(Option<&str>, u32)> = drive_unit
        .get("driveUnitAssistModes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|mode| {
            let km = unsigned(mode, "reachableRange")?;
            let name = mode.get("name").and_then(Value::as_str);
            Some((name, u32::try_from(km).unwrap_or(u32::MAX)))
        })
        .collect();
    modes.sort_by(|a, b| b.1.cmp(&a.1));
    modes
        .into_iter()
        .enumerate()
        .map(|(i, (name, distance_km))| RangeEstimate {
            mode: name.map_or_else(|| mode_name(i), str::to_string),
            distance_km,
        })
        .collect()
}

fn live_ranges(live: &Value) -> Vec<RangeEstimate> {
    live.get("reachableRange")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(as_unsigned)
        .enumerate()
        .map(|(i, km)| RangeEstimate {
            mode: mode_name(i),
            distance_km: u32::try_from(km).unwrap_or(u32::MAX),
        })
        .collect()
}

fn mode_name(index: usize) -> String {
    ASSIST_MODES
        .get(index)
        .map_or_else(|| format!("mode{}", index + 1), |m| (*m).to_string())
}

fn component(value: &Value) -> ComponentInfo {
    ComponentInfo {
        product_name: string(value, "productName"),
        software_version: string(value, "softwareVersion"),
        serial_number: string(value, "serialNumber"),
    }
}

/// Nested object, or `null` when missing so lookups chain without panicking.
fn object<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&Value::Null)
}

fn number(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn unsigned(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(as_unsigned)
}

fn as_unsigned(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.round() as u64)
    })
}

fn flag(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

fn string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}
