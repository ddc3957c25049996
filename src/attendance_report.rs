// src/attendance_report.rs

use std::io::Write;
use thiserror::Error;
use tracing::warn;

use crate::attendance_session::format_hms;
use crate::hrms_client::{parse_server_time, AttendanceRecord};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worked seconds for a completed session row; `None` while the session is
/// still open or when either timestamp is unusable.
pub fn worked_seconds(record: &AttendanceRecord) -> Option<u64> {
    let check_in = parse_server_time(record.check_in_time.as_deref()?).ok()?;
    let check_out = parse_server_time(record.check_out_time.as_deref()?).ok()?;
    let seconds = check_out.signed_duration_since(check_in).num_seconds();
    if seconds < 0 {
        warn!(
            "Record for {} has check-out before check-in; skipping duration",
            record.employee_id
        );
        return None;
    }
    Some(seconds as u64)
}

/// Writes records as CSV with a derived worked-duration column. The
/// duration column is left blank for open or unusable rows.
pub fn write_csv<W: Write>(records: &[AttendanceRecord], writer: W) -> Result<(), ReportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "employeeId",
        "employeeName",
        "date",
        "checkInTime",
        "checkOutTime",
        "worked",
    ])?;
    for record in records {
        csv_writer.write_record([
            record.employee_id.as_str(),
            record.employee_name.as_deref().unwrap_or(""),
            &record
                .date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            record.check_in_time.as_deref().unwrap_or(""),
            record.check_out_time.as_deref().unwrap_or(""),
            &worked_seconds(record).map(format_hms).unwrap_or_default(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// One-line rendering for terminal output.
pub fn format_record(record: &AttendanceRecord) -> String {
    format!(
        "{}  {}  in: {}  out: {}  worked: {}",
        record
            .date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string()),
        record.employee_id,
        record.check_in_time.as_deref().unwrap_or("-"),
        record.check_out_time.as_deref().unwrap_or("-"),
        worked_seconds(record)
            .map(format_hms)
            .unwrap_or_else(|| "-".to_string()),
    )
}
