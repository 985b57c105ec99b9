use super::shared::{self, passed, verdict};
use super::{stage, GuardResult, TransitionContext, TransitionResult, TransitionTable, C, N};
use crate::workflows::scrutinio::attendance;
use crate::workflows::scrutinio::credits;
use crate::workflows::scrutinio::domain::{PeriodType, StudentId, SubjectKind};
use crate::workflows::scrutinio::messages::{Message, MessageCode, Validation};
use crate::workflows::scrutinio::outcomes::{self, GradeProfile, Verdict};

pub(super) fn register(table: &mut TransitionTable) {
    let period = PeriodType::Final;
    table.register(period, N, stage(1), shared::start_session);
    table.register(period, stage(1), N, shared::unfreeze);
    table.register(period, stage(1), stage(2), shared::record_presence);
    table.register(period, stage(2), stage(1), shared::revert);
    table.register(period, stage(2), stage(3), attendance_eligibility);
    table.register(period, stage(3), stage(2), release_eligibility);
    table.register(period, stage(3), stage(4), shared::civic_grades);
    table.register(period, stage(4), stage(3), shared::revert);
    table.register(period, stage(4), stage(5), shared::conduct_deliberation);
    table.register(period, stage(5), stage(4), shared::revert);
    table.register(period, stage(5), stage(6), accept_outcomes);
    table.register(period, stage(6), stage(5), reopen_outcomes);
    table.register(period, stage(6), stage(7), credits_and_competences);
    table.register(period, stage(7), stage(6), withdraw_communications);
    table.register(period, stage(7), stage(8), communications);
    table.register(period, stage(8), stage(7), shared::reset_minutes);
    table.register(period, stage(8), C, shared::close);
    table.register(period, C, stage(8), shared::reopen);
}

/// Absence ceiling over first-term and final hours; the partition becomes the roster.
///
/// First-term hours count only once that session is closed.
fn attendance_eligibility(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let class_id = ctx.workspace.class.id;
    let first_term_votes = ctx.repository.closed_first_term_votes(class_id)?;

    let students = ctx.workspace.active_students();
    let tallies = attendance::tally_absences(
        &students,
        first_term_votes.iter().chain(ctx.workspace.votes.values()),
    );
    let assessment = attendance::evaluate(
        &ctx.workspace.class,
        &students,
        &tallies,
        &ctx.policy.attendance,
    );
    let partition = match assessment.resolve(&ctx.payload.dispositions) {
        Ok(partition) => partition,
        Err(validation) => return Ok(GuardResult::Blocked(validation)),
    };

    for student in partition.abroad.iter().copied() {
        assign_attendance_verdict(ctx, student, Verdict::Abroad);
    }
    for student in partition.ineligible.iter().copied() {
        assign_attendance_verdict(ctx, student, Verdict::Ineligible);
    }
    for student in partition.assessed() {
        let stale = ctx
            .workspace
            .outcomes
            .get(&student)
            .map(|outcome| outcome.verdict.is_attendance_verdict())
            .unwrap_or(false);
        if stale {
            ctx.workspace.remove_outcome(student);
        }
    }

    ctx.workspace.session.eligibility = Some(partition);
    passed()
}

fn assign_attendance_verdict(
    ctx: &mut TransitionContext<'_>,
    student: StudentId,
    verdict: Verdict,
) {
    let current = ctx.workspace.outcomes.get(&student).map(|outcome| outcome.verdict);
    if current != Some(verdict) {
        let outcome = shared::new_outcome(ctx, student, verdict);
        ctx.workspace.insert_outcome(outcome);
    }
}

fn release_eligibility(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    ctx.workspace.session.eligibility = None;
    passed()
}

fn accept_outcomes(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let validation = outcomes::final_coherence(ctx.workspace);
    if validation.is_blocked() {
        return Ok(GuardResult::Blocked(validation));
    }
    shared::cache_outcome_figures(ctx);
    passed()
}

fn reopen_outcomes(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    shared::clear_outcome_figures(ctx);
    passed()
}

fn credits_and_competences(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    Ok(verdict(credits::credit_issues(ctx.workspace)))
}

fn withdraw_communications(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    for outcome in ctx.workspace.outcomes.values_mut() {
        outcome.debt_notice_confirmed = false;
        outcome.deficiency_notice_confirmed = false;
    }
    passed()
}

/// Debt notices for suspended students and deficiency notices for students whose
/// sub-pass proposal was raised in council. Not required for graduating classes.
fn communications(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let validation = if ctx.workspace.class.is_graduating() {
        Validation::new()
    } else {
        communication_issues(ctx)
    };
    let result = verdict(validation);
    if matches!(result, GuardResult::Passed(_)) {
        shared::open_minutes(ctx);
    }
    Ok(result)
}

fn communication_issues(ctx: &TransitionContext<'_>) -> Validation {
    let workspace = &*ctx.workspace;
    let scales = workspace.scales();
    let mut validation = Validation::new();

    for student in workspace.active_roster() {
        let Some(outcome) = workspace.outcomes.get(&student) else {
            continue;
        };
        let name = workspace.student_name(student);

        if outcome.verdict == Verdict::Suspended
            && !GradeProfile::for_student(workspace, student).failing.is_empty()
            && !outcome.debt_notice_confirmed
        {
            validation.push(
                Message::blocking(
                    MessageCode::MissingDebtNotice,
                    format!("Debt notice not confirmed for {name}"),
                )
                .for_student(student),
            );
        }

        if matches!(outcome.verdict, Verdict::Admitted | Verdict::Suspended) {
            let resolved_deficiency = workspace
                .subjects
                .iter()
                .filter(|subject| subject.kind == SubjectKind::Standard)
                .filter_map(|subject| workspace.vote(student, subject.id))
                .any(|vote| {
                    let scale = scales.standard;
                    matches!(
                        (vote.proposed, vote.grade),
                        (Some(proposed), Some(grade))
                            if scale.is_failing(proposed) && !scale.is_failing(grade)
                    )
                });
            if resolved_deficiency && !outcome.deficiency_notice_confirmed {
                validation.push(
                    Message::blocking(
                        MessageCode::MissingDeficiencyNotice,
                        format!("Deficiency notice not confirmed for {name}"),
                    )
                    .for_student(student),
                );
            }
        }
    }
    validation
}
