use serde::{Deserialize, Deserializer};
use std::io::Read;

use crate::workflows::scrutinio::votes::RecoveryMode;

#[derive(Debug)]
pub(crate) struct ProposalRecord {
    pub(crate) line: u64,
    pub(crate) student: u32,
    pub(crate) subject: u32,
    pub(crate) teacher: Option<u32>,
    pub(crate) grade: Option<u8>,
    pub(crate) recovery: Option<String>,
    pub(crate) debt: Option<String>,
}

pub(crate) fn parse_records<R: Read>(reader: R) -> Result<Vec<ProposalRecord>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut records = Vec::new();

    for (index, record) in csv_reader.deserialize::<ProposalRow>().enumerate() {
        let row = record?;
        records.push(ProposalRecord {
            // header is line 1
            line: index as u64 + 2,
            student: row.student,
            subject: row.subject,
            teacher: row.teacher,
            grade: row.grade,
            recovery: row.recovery,
            debt: row.debt,
        });
    }

    Ok(records)
}

#[derive(Debug, Deserialize)]
struct ProposalRow {
    #[serde(rename = "Student")]
    student: u32,
    #[serde(rename = "Subject")]
    subject: u32,
    #[serde(rename = "Teacher", default)]
    teacher: Option<u32>,
    #[serde(rename = "Grade", default)]
    grade: Option<u8>,
    #[serde(rename = "Recovery", default, deserialize_with = "empty_string_as_none")]
    recovery: Option<String>,
    #[serde(rename = "Debt", default, deserialize_with = "empty_string_as_none")]
    debt: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

/// Accepts the register's one-letter codes as well as the snake_case names.
pub(crate) fn parse_recovery(value: &str) -> Option<RecoveryMode> {
    match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "a" | "self_study" => Some(RecoveryMode::SelfStudy),
        "c" | "course" => Some(RecoveryMode::Course),
        "s" | "help_desk" => Some(RecoveryMode::HelpDesk),
        "i" | "in_class" => Some(RecoveryMode::InClass),
        "p" | "teaching_pause" => Some(RecoveryMode::TeachingPause),
        _ => None,
    }
}
