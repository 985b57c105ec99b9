use std::collections::BTreeSet;

use tracing::info;

use super::{GuardResult, TransitionContext, TransitionResult};
use crate::workflows::scrutinio::credits::{previous_credit, CERTIFICATION_YEAR};
use crate::workflows::scrutinio::domain::{StudentId, SubjectKind, TeacherId};
use crate::workflows::scrutinio::messages::{Message, MessageCode, Validation};
use crate::workflows::scrutinio::minutes::{self, MinutesBlueprint};
use crate::workflows::scrutinio::outcomes::{Outcome, Verdict};
use crate::workflows::scrutinio::repository::{AbsenceQuery, DocumentFolder};
use crate::workflows::scrutinio::roster;
use crate::workflows::scrutinio::session::RosterSnapshot;
use crate::workflows::scrutinio::votes;

pub(super) fn passed() -> TransitionResult {
    Ok(GuardResult::Passed(Validation::new()))
}

pub(super) fn verdict(validation: Validation) -> GuardResult {
    if validation.is_blocked() {
        GuardResult::Blocked(validation)
    } else {
        GuardResult::Passed(validation)
    }
}

/// Unconditional step back.
pub(super) fn revert(_ctx: &mut TransitionContext<'_>) -> TransitionResult {
    passed()
}

/// Back to `N`: the roster is recomputed on the next start.
pub(super) fn unfreeze(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    ctx.workspace.session.roster = RosterSnapshot::default();
    ctx.workspace.session.scales = None;
    passed()
}

/// Proposal check, then final votes for every roster student.
pub(super) fn start_session(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let class = ctx.workspace.class.clone();
    let period = ctx.workspace.session.period;
    ctx.workspace.session.scales = Some(ctx.policy.scales);

    let proposals = ctx.repository.proposals(class.id, period)?;
    let validation = votes::proposal_issues(ctx.workspace, &proposals);
    if validation.is_blocked() {
        return Ok(GuardResult::Blocked(validation));
    }

    let students: Vec<_> = ctx.workspace.students.values().cloned().collect();
    ctx.workspace.session.roster = roster::snapshot(&students);

    let window = ctx.policy.calendar.window(period);
    let repository = ctx.repository;
    votes::materialize_final_votes(ctx.workspace, &proposals, |student, subject| {
        repository.absence_hours(&AbsenceQuery {
            class_id: class.id,
            student,
            subject: subject.id,
            from: window.from,
            to: window.to,
        })
    })?;

    Ok(GuardResult::Passed(validation))
}

/// Presence roll: date, start time, chair, secretary and a complete roll call.
pub(super) fn record_presence(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let teachers = ctx.repository.teachers(ctx.workspace.class.id)?;
    let mut validation = Validation::new();

    let Some(form) = ctx.payload.presence.as_ref() else {
        validation.push(Message::blocking(
            MessageCode::IncompletePresence,
            "Presence roll not submitted",
        ));
        return Ok(GuardResult::Blocked(validation));
    };

    if form.date.is_none() {
        validation.push(Message::blocking(
            MessageCode::MissingSessionDate,
            "Session date is missing",
        ));
    }
    if form.start_time.is_none() {
        validation.push(Message::blocking(
            MessageCode::MissingStartTime,
            "Start time is missing",
        ));
    }
    let roll = &form.roll;
    if !roll.principal_presides && roll.chair.is_none() {
        validation.push(Message::blocking(
            MessageCode::MissingChair,
            "Chair of the session is missing",
        ));
    }
    if roll.secretary.is_none() {
        validation.push(Message::blocking(
            MessageCode::MissingSecretary,
            "Secretary of the session is missing",
        ));
    }

    let listed: BTreeSet<TeacherId> = roll.attendance.iter().map(|entry| entry.teacher).collect();
    for teacher in teachers.iter().filter(|teacher| !listed.contains(teacher)) {
        validation.push(
            Message::blocking(
                MessageCode::IncompletePresence,
                format!("Presence of teacher {teacher} not recorded"),
            )
            .for_teacher(*teacher),
        );
    }
    for entry in roll.attendance.iter().filter(|entry| !entry.present) {
        let complete = entry
            .substitute
            .as_ref()
            .map(|substitute| substitute.is_complete())
            .unwrap_or(false);
        if !complete {
            validation.push(
                Message::blocking(
                    MessageCode::IncompletePresence,
                    format!(
                        "Absent teacher {} needs a substitute with delegation protocol and date",
                        entry.teacher
                    ),
                )
                .for_teacher(entry.teacher),
            );
        }
    }

    if validation.is_blocked() {
        return Ok(GuardResult::Blocked(validation));
    }

    let session = &mut ctx.workspace.session;
    session.date = form.date;
    session.start_time = form.start_time;
    session.presence = Some(roll.clone());
    Ok(GuardResult::Passed(validation))
}

pub(super) fn civic_grades(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    Ok(verdict(votes::civic_issues(ctx.workspace)))
}

pub(super) fn conduct_deliberation(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    Ok(verdict(votes::conduct_issues(ctx.workspace)))
}

/// Marks the validable minutes steps of this class as pending.
pub(super) fn open_minutes(ctx: &mut TransitionContext<'_>) {
    let blueprint = MinutesBlueprint::standard(ctx.workspace.session.period);
    let year = ctx.workspace.class.year;
    minutes::initialize(&mut ctx.workspace.session.minutes, &blueprint, year);
}

pub(super) fn reset_minutes(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    minutes::reset(&mut ctx.workspace.session.minutes);
    passed()
}

pub(super) fn close(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let blueprint = MinutesBlueprint::standard(ctx.workspace.session.period);
    let closing = ctx.payload.closing.as_ref();
    let validation = minutes::closing_issues(
        &ctx.workspace.session.minutes,
        &blueprint,
        ctx.workspace.class.year,
        closing,
    );
    if validation.is_blocked() {
        return Ok(GuardResult::Blocked(validation));
    }

    let session = &mut ctx.workspace.session;
    session.end_time = closing.and_then(|form| form.end_time);
    session.minutes.number = closing
        .and_then(|form| form.minutes_number)
        .and_then(|number| u32::try_from(number).ok());
    Ok(GuardResult::Passed(validation))
}

/// Reopening needs staff capability and no synchronisation lock.
///
/// Generated documents move to a backup folder before the state flips.
pub(super) fn reopen(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    if !ctx.actor.elevated || ctx.workspace.session.sync_locked {
        return Ok(GuardResult::Unauthorized);
    }

    let folder = DocumentFolder::new(&ctx.workspace.class, ctx.workspace.session.period);
    let receipt = ctx.documents.archive(&folder)?;
    info!(
        class = %ctx.workspace.class.label(),
        period = %ctx.workspace.session.period,
        moved = receipt.moved,
        backup = receipt.backup.as_deref().unwrap_or("-"),
        "archived generated documents before reopening"
    );
    passed()
}

/// Clears figures computed when outcomes were accepted.
pub(super) fn clear_outcome_figures(ctx: &mut TransitionContext<'_>) {
    let certification_year = ctx.workspace.class.year == CERTIFICATION_YEAR;
    for outcome in ctx.workspace.outcomes.values_mut() {
        outcome.average = None;
        outcome.credit = None;
        outcome.previous_credit = None;
        outcome.credit_criteria.clear();
        if certification_year {
            outcome.certification_completed = false;
        }
    }
}

/// Caches averages and carried-over credits on every assessed student's outcome.
pub(super) fn cache_outcome_figures(ctx: &mut TransitionContext<'_>) {
    let year = ctx.workspace.class.year;
    for student in ctx.workspace.active_roster() {
        let average = votes::compute_average(ctx.workspace, student);
        let previous = ctx.workspace.students.get(&student).map(|record| {
            let credits = ctx
                .workspace
                .credit_updates
                .get(&student)
                .copied()
                .unwrap_or(record.previous_credits);
            previous_credit(year, credits)
        });
        if let Some(outcome) = ctx.workspace.outcomes.get_mut(&student) {
            if outcome.average.is_none() {
                outcome.average = average;
            }
            outcome.previous_credit = previous;
        }
    }
}

/// Students with a failing standard or civic-education grade lacking recovery or debt text.
pub(super) fn debt_communication_issues(ctx: &TransitionContext<'_>) -> Validation {
    let workspace = &*ctx.workspace;
    let scales = workspace.scales();
    let mut validation = Validation::new();

    for student in workspace.active_students() {
        let incomplete = workspace
            .subjects
            .iter()
            .filter(|subject| {
                matches!(
                    subject.kind,
                    SubjectKind::Standard | SubjectKind::CivicEducation
                )
            })
            .filter_map(|subject| {
                let vote = workspace.vote(student.id, subject.id)?;
                let grade = vote.grade?;
                scales
                    .for_kind(subject.kind)
                    .is_failing(grade)
                    .then_some(vote)
            })
            .any(|vote| vote.recovery.is_none() || !vote.has_debt_text());
        if incomplete {
            validation.push(
                Message::blocking(
                    MessageCode::MissingDebtCommunication,
                    format!("Debt communication incomplete for {}", student.name),
                )
                .for_student(student.id),
            );
        }
    }
    validation
}

pub(super) fn new_outcome(
    ctx: &TransitionContext<'_>,
    student: StudentId,
    verdict: Verdict,
) -> Outcome {
    Outcome::new(ctx.workspace.session.id, student, verdict)
}
