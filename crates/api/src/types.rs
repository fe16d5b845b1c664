use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    serde_json::Value,
};

/// A bike registered to the account, as listed by the profile service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BikeSummary {
    pub id: String,
    pub brand_name: Option<String>,
    pub drive_unit_name: Option<String>,
    pub frame_number: Option<String>,
}

impl BikeSummary {
    /// Parse one `data[]` entry of the bike-profile listing.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id").and_then(Value::as_str)?.to_string();
        let attrs = value.get("attributes").unwrap_or(&Value::Null);
        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
        Some(Self {
            id,
            brand_name: text(attrs.get("brandName")),
            drive_unit_name: text(attrs.get("driveUnit").and_then(|d| d.get("productName"))),
            frame_number: text(attrs.get("frameNumber")),
        })
    }

    /// Human-readable name, e.g. `Cube (Performance Line CX)` or `Cube (...1234)`.
    pub fn display_name(&self) -> String {
        let brand = self.brand_name.as_deref().unwrap_or("eBike");
        if let Some(drive_unit) = self.drive_unit_name.as_deref() {
            return format!("{brand} ({drive_unit})");
        }
        match self.frame_number.as_deref() {
            Some(frame) if frame.chars().count() >= 4 => {
                let tail: String = frame.chars().skip(frame.chars().count() - 4).collect();
                format!("{brand} (...{tail})")
            },
            _ => brand.to_string(),
        }
    }
}

/// A recorded ride.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub id: String,
    pub bike_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    /// Provider attributes, kept as-is.
    pub attributes: Value,
}

impl ActivitySummary {
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())?
            .to_string();
        let attributes = value.get("attributes").cloned().unwrap_or(Value::Null);
        Some(Self {
            id,
            bike_id: attributes
                .get("bikeId")
                .and_then(Value::as_str)
                .map(str::to_string),
            start_time: attributes
                .get("startTime")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            attributes,
        })
    }
}
