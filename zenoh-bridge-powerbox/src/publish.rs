//! Conversion of raw register values into published readings.

use powerbox_common::UserProperties;
use tracing::debug;

use crate::bus::{BusError, BusPublisher};
use crate::config::DataType;
use crate::task::ReadSpec;

/// Interpret a raw register word.
pub fn decode(raw: u16, data_type: DataType) -> f64 {
    match data_type {
        DataType::U16 => raw as f64,
        DataType::I16 => raw as i16 as f64,
    }
}

/// Render `value` with exactly `precision` decimals.
///
/// Ties round away from zero. Values that round to zero are printed without
/// a sign.
pub fn format_value(value: f64, precision: usize) -> String {
    let factor = 10f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
    let rounded = (value * factor).round() / factor;
    let value = if rounded.is_finite() { rounded } else { value };
    let rendered = format!("{:.*}", precision, value);
    match rendered.strip_prefix('-') {
        Some(magnitude) if magnitude.chars().all(|c| c == '0' || c == '.') => {
            magnitude.to_string()
        }
        _ => rendered,
    }
}

/// Scale and format a raw register word for one read.
pub fn render(raw: u16, spec: &ReadSpec) -> String {
    format_value(decode(raw, spec.data_type) * spec.scale, spec.precision)
}

/// Publish a reading to its topic, tagged as self-originated.
///
/// Returns the published payload.
pub async fn publish_reading<B: BusPublisher + ?Sized>(
    bus: &B,
    spec: &ReadSpec,
    raw: u16,
) -> Result<String, BusError> {
    let payload = render(raw, spec);
    bus.publish(
        &spec.topic,
        payload.clone(),
        UserProperties::self_originated(),
    )
    .await?;

    debug!(point = %spec.point, topic = %spec.topic, value = %payload, "Published reading");
    Ok(payload)
}
