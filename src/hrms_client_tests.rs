// src/hrms_client_tests.rs

#[cfg(test)]
mod tests {
    use crate::attendance_session::AttendanceState;
    use crate::hrms_client::{
        is_status_message, normalize_state, parse_server_time, to_server_time, BulkOutcome,
        Envelope, HrmsError, PendingRosterResponse, SessionRecord,
    };
    use chrono::NaiveDateTime;
    use serde_json::json;

    fn dt(datetime_str: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    // --- Envelope Normalization ---

    #[test]
    fn envelope_unwraps_the_wrapped_shape() {
        let value = json!({
            "data": {
                "employees": [
                    {"employeeId": "amy", "employeeName": "Amy", "hasCheckedIn": false, "hasCheckedOut": false}
                ]
            }
        });
        let envelope: Envelope<PendingRosterResponse> = serde_json::from_value(value).unwrap();
        let roster = envelope.into_inner();
        assert_eq!(roster.employees.len(), 1);
        assert_eq!(roster.employees[0].employee_id, "amy");
    }

    #[test]
    fn envelope_accepts_the_bare_shape() {
        let value = json!({
            "employees": [
                {"employeeId": "ben", "hasCheckedIn": true, "checkInTime": "2025-06-02T08:30:00"}
            ]
        });
        let envelope: Envelope<PendingRosterResponse> = serde_json::from_value(value).unwrap();
        let roster = envelope.into_inner();
        assert_eq!(roster.employees[0].employee_id, "ben");
        assert!(roster.employees[0].has_checked_in);
    }

    #[test]
    fn envelope_handles_bare_arrays() {
        let value = json!([{"employeeId": "amy", "date": "2025-06-02"}]);
        let envelope: Envelope<Vec<crate::hrms_client::AttendanceRecord>> =
            serde_json::from_value(value).unwrap();
        assert_eq!(envelope.into_inner().len(), 1);
    }

    // --- Timestamp Handling ---

    #[test]
    fn parse_server_time_accepts_both_known_formats() {
        assert_eq!(
            parse_server_time("2025-06-02T09:15:00").unwrap(),
            dt("2025-06-02 09:15:00")
        );
        assert_eq!(
            parse_server_time("2025-06-02T09:15:00+00:00").unwrap(),
            dt("2025-06-02 09:15:00")
        );
        assert_eq!(
            parse_server_time("2025-06-02T09:15:00.250").unwrap(),
            dt("2025-06-02 09:15:00") + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn parse_server_time_folds_garbage_into_a_payload_error() {
        let result = parse_server_time("yesterday-ish");
        if let Err(HrmsError::MalformedPayload(message)) = result {
            assert!(message.contains("yesterday-ish"));
        } else {
            panic!("Wrong error type returned");
        }
    }

    #[test]
    fn to_server_time_renders_the_wire_format() {
        assert_eq!(to_server_time(dt("2025-06-02 09:15:00")), "2025-06-02T09:15:00");
    }

    // --- State Normalization ---

    #[test]
    fn normalize_state_maps_the_three_valid_shapes() {
        assert_eq!(
            normalize_state(false, false, None, None).unwrap(),
            AttendanceState::NotCheckedIn
        );
        assert_eq!(
            normalize_state(true, false, Some("2025-06-02T08:30:00"), None).unwrap(),
            AttendanceState::CheckedIn {
                since: dt("2025-06-02 08:30:00")
            }
        );
        assert_eq!(
            normalize_state(
                false,
                true,
                Some("2025-06-02T08:30:00"),
                Some("2025-06-02T16:00:00")
            )
            .unwrap(),
            AttendanceState::CheckedOut {
                checked_in: Some(dt("2025-06-02 08:30:00")),
                checked_out: dt("2025-06-02 16:00:00"),
            }
        );
    }

    #[test]
    fn normalize_state_lets_checked_out_win_over_a_stale_checked_in_flag() {
        // Both booleans set is not representable in the domain model; the
        // terminal state wins.
        let state = normalize_state(
            true,
            true,
            Some("2025-06-02T08:30:00"),
            Some("2025-06-02T16:00:00"),
        )
        .unwrap();
        assert!(state.is_checked_out());
        assert!(!state.is_checked_in());
    }

    #[test]
    fn normalize_state_infers_from_timestamps_when_flags_are_missing() {
        let state = normalize_state(false, false, Some("2025-06-02T08:30:00"), None).unwrap();
        assert_eq!(
            state,
            AttendanceState::CheckedIn {
                since: dt("2025-06-02 08:30:00")
            }
        );
    }

    #[test]
    fn normalize_state_rejects_a_checked_in_flag_without_a_time() {
        let result = normalize_state(true, false, None, None);
        assert!(matches!(result, Err(HrmsError::MalformedPayload(_))));

        let result = normalize_state(false, true, None, None);
        assert!(matches!(result, Err(HrmsError::MalformedPayload(_))));
    }

    // --- Wire Structures ---

    #[test]
    fn session_record_tolerates_missing_flags() {
        let record: SessionRecord = serde_json::from_value(json!({
            "employeeId": "amy",
            "checkInTime": "2025-06-02T08:30:00"
        }))
        .unwrap();
        assert_eq!(record.employee_id.as_deref(), Some("amy"));
        assert_eq!(record.has_checked_in, None);
        assert_eq!(record.check_out_time, None);
    }

    #[test]
    fn bulk_outcome_defaults_missing_sets_to_empty() {
        let outcome: BulkOutcome =
            serde_json::from_value(json!({"succeeded": ["amy", "ben"]})).unwrap();
        assert_eq!(outcome.succeeded.len(), 2);
        assert!(outcome.failed.is_empty());
        assert!(outcome.is_complete());

        let outcome: BulkOutcome =
            serde_json::from_value(json!({"succeeded": ["amy"], "failed": ["ben"]})).unwrap();
        assert!(!outcome.is_complete());
    }

    // --- Empty-status Detection ---

    #[test]
    fn a_bare_message_body_counts_as_no_session() {
        assert!(is_status_message(&json!({"message": "No attendance yet"})));
    }

    #[test]
    fn a_session_record_with_a_message_field_is_still_a_session() {
        assert!(!is_status_message(&json!({
            "message": "ok",
            "hasCheckedIn": true,
            "checkInTime": "2025-06-02T08:30:00"
        })));
    }
}
