use std::collections::BTreeMap;

use super::common::*;
use crate::workflows::scrutinio::outcomes::{final_coherence, makeup_coherence};
use crate::workflows::scrutinio::{
    FinalVote, MessageCode, Outcome, PeriodType, RosterSnapshot, SessionId, SessionWorkspace,
    StudentId, Subject, SubjectId, SubjectKind, Verdict,
};

fn decide(workspace: &mut SessionWorkspace, student: StudentId, verdict: Verdict) -> &mut Outcome {
    workspace.insert_outcome(Outcome::new(SessionId(1), student, verdict));
    workspace
        .outcomes
        .get_mut(&student)
        .expect("outcome just inserted")
}

fn graded_final(year: u8) -> SessionWorkspace {
    let mut workspace = workspace(PeriodType::Final, year);
    grade_everything(&mut workspace);
    workspace
}

fn admit_everyone(workspace: &mut SessionWorkspace) {
    for student in [ANNA, LUCA, SARA] {
        decide(workspace, student, Verdict::Admitted);
    }
}

#[test]
fn coherent_outcomes_pass() {
    let mut workspace = graded_final(3);
    admit_everyone(&mut workspace);
    assert!(final_coherence(&workspace).is_empty());
}

#[test]
fn every_assessed_student_needs_an_outcome() {
    let workspace = graded_final(3);
    let validation = final_coherence(&workspace);
    assert_eq!(validation.count(MessageCode::MissingOutcome), 3);
}

#[test]
fn admission_with_failing_grades_is_refused() {
    let mut workspace = graded_final(3);
    admit_everyone(&mut workspace);
    set_grade(&mut workspace, ANNA, MATH, 4);

    let validation = final_coherence(&workspace);

    assert_eq!(validation.count(MessageCode::AdmittedWithFailures), 1);
    assert_eq!(validation.messages()[0].student, Some(ANNA));
}

#[test]
fn non_admission_needs_a_judgement_and_a_failure() {
    let mut workspace = graded_final(3);
    admit_everyone(&mut workspace);
    decide(&mut workspace, SARA, Verdict::NotAdmitted);

    let validation = final_coherence(&workspace);

    assert_eq!(validation.messages().len(), 2);
    assert_eq!(validation.count(MessageCode::MissingJudgement), 1);
    assert_eq!(validation.count(MessageCode::NotAdmittedWithoutFailures), 1);
}

#[test]
fn suspension_is_limited_to_three_failing_subjects() {
    let mut workspace = graded_final(3);
    let history = SubjectId(6);
    workspace.subjects.push(Subject {
        id: history,
        name: "Storia".to_string(),
        kind: SubjectKind::Standard,
        counts_toward_average: true,
    });
    for student in [ANNA, SARA] {
        set_grade(&mut workspace, student, history, 7);
    }
    for subject in [ITALIAN, MATH, CIVICS, history] {
        set_grade(&mut workspace, LUCA, subject, 4);
    }
    admit_everyone(&mut workspace);
    decide(&mut workspace, LUCA, Verdict::Suspended);

    let validation = final_coherence(&workspace);

    assert_eq!(validation.messages().len(), 1);
    assert_eq!(validation.count(MessageCode::TooManyFailures), 1);
}

#[test]
fn suspension_with_failing_conduct_is_refused() {
    let mut workspace = graded_final(3);
    set_grade(&mut workspace, LUCA, MATH, 5);
    set_grade(&mut workspace, LUCA, CONDUCT, 5);
    admit_everyone(&mut workspace);
    decide(&mut workspace, LUCA, Verdict::Suspended);

    let validation = final_coherence(&workspace);

    assert_eq!(validation.count(MessageCode::FailingConductOutcome), 1);
    assert!(validation.is_blocked());
}

#[test]
fn graduating_class_admits_one_failure_only_with_a_judgement() {
    let mut workspace = graded_final(5);
    admit_everyone(&mut workspace);
    set_grade(&mut workspace, ANNA, MATH, 5);
    set_grade(&mut workspace, SARA, MATH, 5);
    set_grade(&mut workspace, SARA, ITALIAN, 5);
    decide(&mut workspace, LUCA, Verdict::Suspended);
    set_grade(&mut workspace, LUCA, MATH, 5);

    let validation = final_coherence(&workspace);
    assert_eq!(validation.count(MessageCode::MissingJudgement), 1);
    assert_eq!(validation.count(MessageCode::AdmittedWithFailures), 1);
    assert_eq!(validation.count(MessageCode::SuspendedInFinalYear), 1);

    decide(&mut workspace, ANNA, Verdict::Admitted).judgement =
        Some("Solid preparation overall".to_string());
    assert_eq!(
        final_coherence(&workspace).count(MessageCode::MissingJudgement),
        0
    );
}

#[test]
fn grades_outside_the_scale_are_flagged() {
    let mut workspace = graded_final(3);
    admit_everyone(&mut workspace);
    set_grade(&mut workspace, ANNA, CONDUCT, 11);

    let validation = final_coherence(&workspace);

    assert_eq!(validation.count(MessageCode::InvalidGrade), 1);
    assert_eq!(validation.messages()[0].subject, Some(CONDUCT));
}

#[test]
fn split_votes_need_the_dissenting_teachers() {
    let mut workspace = graded_final(3);
    admit_everyone(&mut workspace);
    decide(&mut workspace, ANNA, Verdict::Admitted).unanimous = Some(false);

    let validation = final_coherence(&workspace);
    assert_eq!(validation.count(MessageCode::MissingDissenters), 1);

    decide(&mut workspace, ANNA, Verdict::Admitted).unanimous = None;
    assert_eq!(
        final_coherence(&workspace).count(MessageCode::MissingDeliberation),
        1
    );
}

fn makeup_workspace() -> (SessionWorkspace, BTreeMap<(StudentId, SubjectId), FinalVote>) {
    let mut workspace = workspace(PeriodType::MakeupExam, 3);
    workspace.session.roster = RosterSnapshot::new([LUCA]);
    grade_everything(&mut workspace);
    let mut final_votes = BTreeMap::new();
    final_votes.insert((LUCA, MATH), vote(LUCA, MATH, Some(5)));
    (workspace, final_votes)
}

#[test]
fn makeup_grades_cannot_drop_below_the_final_grade() {
    let (mut workspace, final_votes) = makeup_workspace();
    decide(&mut workspace, LUCA, Verdict::NotAdmitted).judgement =
        Some("Gaps not recovered".to_string());
    set_grade(&mut workspace, LUCA, MATH, 4);

    let validation = makeup_coherence(&workspace, &final_votes);

    assert_eq!(validation.messages().len(), 1);
    assert_eq!(validation.count(MessageCode::MakeupGradeBelowFinal), 1);
}

#[test]
fn deferral_needs_a_reason_but_no_deliberation() {
    let (mut workspace, final_votes) = makeup_workspace();
    decide(&mut workspace, LUCA, Verdict::Deferred).unanimous = None;

    let validation = makeup_coherence(&workspace, &final_votes);
    assert_eq!(validation.messages().len(), 1);
    assert_eq!(validation.count(MessageCode::MissingDeferralReason), 1);

    decide(&mut workspace, LUCA, Verdict::Deferred).deferral_reason =
        Some("Exam postponed for illness".to_string());
    assert!(makeup_coherence(&workspace, &final_votes).is_empty());
}
