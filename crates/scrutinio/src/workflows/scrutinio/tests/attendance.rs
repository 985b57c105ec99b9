use std::collections::BTreeMap;

use super::common::*;
use crate::workflows::scrutinio::attendance::{evaluate, tally_absences};
use crate::workflows::scrutinio::{
    AttendancePolicy, AttendanceStatus, Disposition, DispositionEntry, MessageCode, Student,
    StudentId,
};

fn hours(entries: &[(StudentId, u32)]) -> BTreeMap<StudentId, u32> {
    entries.iter().copied().collect()
}

#[test]
fn ceiling_is_a_quarter_of_the_yearly_hours() {
    let policy = AttendancePolicy::default();
    assert_eq!(policy.yearly_hours(12), 396);
    assert_eq!(policy.ceiling(12), 99);
    assert_eq!(policy.ceiling(30), 247);
    assert_eq!(AttendancePolicy::new(0).school_weeks(), 33);
}

#[test]
fn students_over_the_ceiling_need_a_disposition() {
    let roster = students();
    let refs: Vec<&Student> = roster.iter().collect();
    let assessment = evaluate(
        &class_info(3, 12),
        &refs,
        &hours(&[(ANNA, 99), (LUCA, 10), (SARA, 100)]),
        &AttendancePolicy::default(),
    );

    assert_eq!(assessment.ceiling, 99);
    let over: Vec<StudentId> = assessment.over_ceiling().map(|entry| entry.student).collect();
    assert_eq!(over, vec![SARA]);
    assert_eq!(assessment.students[2].percentage, 25.25);

    let undecided = assessment.resolve(&[]).expect_err("sara is undecided");
    assert_eq!(undecided.count(MessageCode::MissingDisposition), 1);
    assert_eq!(undecided.messages()[0].student, Some(SARA));

    let blank = assessment
        .resolve(&[DispositionEntry {
            student: SARA,
            disposition: Disposition::Waiver {
                justification: " ".to_string(),
            },
        }])
        .expect_err("waiver needs a reason");
    assert_eq!(blank.count(MessageCode::MissingWaiverJustification), 1);
}

#[test]
fn waived_students_stay_assessed_and_ineligible_ones_do_not() {
    let roster = students();
    let refs: Vec<&Student> = roster.iter().collect();
    let assessment = evaluate(
        &class_info(3, 12),
        &refs,
        &hours(&[(ANNA, 120), (SARA, 100)]),
        &AttendancePolicy::default(),
    );

    let partition = assessment
        .resolve(&[
            DispositionEntry {
                student: ANNA,
                disposition: Disposition::Ineligible,
            },
            DispositionEntry {
                student: SARA,
                disposition: Disposition::Waiver {
                    justification: "Documented health reasons".to_string(),
                },
            },
        ])
        .expect("every student decided");

    assert_eq!(partition.eligible, vec![LUCA]);
    assert_eq!(partition.ineligible, vec![ANNA]);
    assert!(partition.is_waived(SARA));
    assert_eq!(partition.assessed(), vec![LUCA, SARA]);
}

#[test]
fn abroad_students_are_tracked_apart_whatever_their_hours() {
    let mut roster = students();
    roster[1].abroad = true;
    let refs: Vec<&Student> = roster.iter().collect();
    let assessment = evaluate(
        &class_info(3, 12),
        &refs,
        &hours(&[(LUCA, 300)]),
        &AttendancePolicy::default(),
    );

    assert_eq!(assessment.students[1].status, AttendanceStatus::Abroad);
    let partition = assessment.resolve(&[]).expect("nothing to decide");
    assert_eq!(partition.abroad, vec![LUCA]);
    assert_eq!(partition.assessed(), vec![ANNA, SARA]);
}

#[test]
fn tallies_add_hours_accrued_elsewhere() {
    let mut roster = students();
    roster[0].extra_absence_hours = 6;
    let refs: Vec<&Student> = roster.iter().collect();
    let votes = [
        vote(ANNA, ITALIAN, Some(7)),
        vote(ANNA, MATH, Some(7)),
        vote(SARA, MATH, Some(7)),
    ]
    .map(|mut record| {
        record.absence_hours = 4;
        record
    });

    let tallies = tally_absences(&refs, votes.iter());

    assert_eq!(tallies[&ANNA], 14);
    assert_eq!(tallies[&LUCA], 0);
    assert_eq!(tallies[&SARA], 4);
}
