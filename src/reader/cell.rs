//! Rendering of raw spreadsheet cell values to text.
//!
//! Both read strategies go through [`render_cell`], so a value always has the
//! same textual form no matter how the segment was read.

use calamine::Data;
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Output format for date cells and converted serial dates.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Renders one cell value as text.
pub fn render_cell(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => render_float(*f),
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            if dt.is_duration() {
                render_float(serial)
            } else {
                excel_serial_to_datetime(serial)
                    .map(|d| d.format(DATETIME_FORMAT).to_string())
                    .unwrap_or_else(|| render_float(serial))
            }
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
    }
}

/// Renders a float without a trailing `.0` when it is integral.
fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Converts an Excel 1900-system serial number to a timestamp.
///
/// Serial 60 is the non-existent 1900-02-29; serials below it are shifted by
/// one day so that 1 maps to 1900-01-01. Returns `None` for non-positive or
/// non-finite serials.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial <= 0.0 {
        return None;
    }

    let mut days = serial.trunc() as i64;
    if days < 60 {
        days += 1;
    }
    let seconds = (serial.fract() * 86_400.0).round() as i64;

    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    epoch
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

/// Normalizes a textual date value for storage.
///
/// Numeric text is treated as an Excel serial; any other non-blank text is
/// kept trimmed, on the assumption it was already formatted by the reader.
pub fn normalize_datetime_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(serial) => {
            excel_serial_to_datetime(serial).map(|d| d.format(DATETIME_FORMAT).to_string())
        }
        Err(_) => Some(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_floats_drop_fraction() {
        assert_eq!(render_cell(&Data::Float(120.0)), "120");
        assert_eq!(render_cell(&Data::Float(0.0)), "0");
        assert_eq!(render_cell(&Data::Float(1.5)), "1.5");
        assert_eq!(render_cell(&Data::Int(42)), "42");
    }

    #[test]
    fn text_bool_and_empty() {
        assert_eq!(render_cell(&Data::String("/Clients".into())), "/Clients");
        assert_eq!(render_cell(&Data::Bool(true)), "TRUE");
        assert_eq!(render_cell(&Data::Empty), "");
    }

    #[test]
    fn serial_dates_convert() {
        let d = excel_serial_to_datetime(45_292.5).unwrap();
        assert_eq!(d.format(DATETIME_FORMAT).to_string(), "2024-01-01 12:00:00");

        let d = excel_serial_to_datetime(1.0).unwrap();
        assert_eq!(d.format(DATETIME_FORMAT).to_string(), "1900-01-01 00:00:00");

        let d = excel_serial_to_datetime(61.0).unwrap();
        assert_eq!(d.format(DATETIME_FORMAT).to_string(), "1900-03-01 00:00:00");

        assert!(excel_serial_to_datetime(0.0).is_none());
        assert!(excel_serial_to_datetime(f64::NAN).is_none());
    }

    #[test]
    fn datetime_text_normalization() {
        assert_eq!(
            normalize_datetime_text(" 45292 ").as_deref(),
            Some("2024-01-01 00:00:00")
        );
        assert_eq!(
            normalize_datetime_text("2024-01-01 08:00:00").as_deref(),
            Some("2024-01-01 08:00:00")
        );
        assert_eq!(normalize_datetime_text("   "), None);
        assert_eq!(normalize_datetime_text("0"), None);
    }
}
