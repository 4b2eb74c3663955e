//! Unit tests for the schedule data model and validation helpers.

use chrono::{TimeZone, Utc};

use clawless::scheduler::model::{
    new_job_ref, new_schedule_id, parse_cron, ScheduleConfig, ScheduleKind, ScheduleMetadata,
    ScheduleType,
};

#[test]
fn schedule_ids_have_the_expected_shape_and_are_unique() {
    let a = new_schedule_id();
    let b = new_schedule_id();
    assert!(a.starts_with("schedule_"), "got: {a}");
    assert_ne!(a, b);

    let parts: Vec<_> = a.splitn(3, '_').collect();
    assert_eq!(parts.len(), 3);
    assert!(parts[1].parse::<i64>().is_ok(), "millis component: {}", parts[1]);
}

#[test]
fn job_refs_have_the_expected_shape() {
    let job_ref = new_job_ref();
    assert!(job_ref.starts_with("job_"), "got: {job_ref}");
    assert!(job_ref.len() > 4);
}

#[test]
fn five_field_cron_expressions_are_accepted() {
    assert!(parse_cron("0 9 * * *").is_ok(), "standard daily-at-nine");
    assert!(parse_cron("*/5 * * * *").is_ok(), "every five minutes");
}

#[test]
fn six_field_cron_expressions_pass_through() {
    assert!(parse_cron("0 0 9 * * *").is_ok());
}

#[test]
fn invalid_cron_expressions_are_rejected() {
    assert!(parse_cron("not a cron").is_err());
    assert!(parse_cron("99 99 * * *").is_err());
}

#[test]
fn persisted_json_uses_camel_case_and_iso_dates() {
    let config = ScheduleConfig {
        id: "schedule_1_abc".to_owned(),
        message: "daily report".to_owned(),
        description: None,
        kind: ScheduleKind::Recurring,
        cron_expression: Some("0 9 * * *".to_owned()),
        run_at: None,
        schedule_type: ScheduleType::Standard,
        metadata: ScheduleMetadata::default(),
        created_at: Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).single().expect("valid"),
        last_run: None,
        active: true,
    };

    let json = serde_json::to_value(&config).expect("serialises");
    assert_eq!(json["kind"], "recurring");
    assert_eq!(json["cronExpression"], "0 9 * * *");
    assert_eq!(json["type"], "standard");
    assert_eq!(json["createdAt"], "2026-07-01T12:00:00Z");
    assert!(json.get("runAt").is_none(), "absent optionals are omitted");
}

#[test]
fn one_time_async_schedule_round_trips() {
    let config = ScheduleConfig {
        id: new_schedule_id(),
        message: "Scan repo for TODOs".to_owned(),
        description: Some("Background task job_ab12".to_owned()),
        kind: ScheduleKind::OneTime,
        cron_expression: None,
        run_at: Some(Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).single().expect("valid")),
        schedule_type: ScheduleType::AsyncConversation,
        metadata: ScheduleMetadata {
            chat_id: Some("12345".to_owned()),
        },
        created_at: Utc::now(),
        last_run: None,
        active: true,
    };

    let json = serde_json::to_string(&config).expect("serialises");
    assert!(json.contains("\"oneTime\""));
    assert!(json.contains("\"async_conversation\""));
    assert!(json.contains("\"chatId\""));

    let back: ScheduleConfig = serde_json::from_str(&json).expect("parses");
    assert_eq!(back, config);
}
