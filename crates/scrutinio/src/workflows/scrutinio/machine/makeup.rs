use std::collections::BTreeMap;

use super::shared::{self, passed};
use super::{stage, GuardResult, TransitionContext, TransitionResult, TransitionTable, C, N};
use crate::workflows::scrutinio::credits;
use crate::workflows::scrutinio::domain::{
    PeriodType, SessionState, StudentId, SubjectId, SubjectKind,
};
use crate::workflows::scrutinio::messages::{Message, MessageCode, Validation};
use crate::workflows::scrutinio::outcomes;
use crate::workflows::scrutinio::roster;
use crate::workflows::scrutinio::votes::{Deliberation, FinalVote};

pub(super) fn register(table: &mut TransitionTable, period: PeriodType) {
    table.register(period, N, stage(1), start_makeup);
    table.register(period, stage(1), N, cancel_start);
    table.register(period, stage(1), stage(2), shared::record_presence);
    table.register(period, stage(2), stage(1), shared::revert);
    table.register(period, stage(2), stage(3), accept_outcomes);
    table.register(period, stage(3), stage(2), reopen_outcomes);
    table.register(period, stage(3), stage(4), credits_and_competences);
    table.register(period, stage(4), stage(3), shared::reset_minutes);
    table.register(period, stage(4), C, shared::close);
    table.register(period, C, stage(4), shared::reopen);
}

fn final_votes_by_key(
    votes: Vec<FinalVote>,
) -> BTreeMap<(StudentId, SubjectId), FinalVote> {
    votes
        .into_iter()
        .map(|vote| ((vote.student, vote.subject), vote))
        .collect()
}

/// Make-up grades replace the failing final grades; passing grades carry over.
fn start_makeup(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let class_id = ctx.workspace.class.id;
    let period = ctx.workspace.session.period;
    let mut validation = Validation::new();

    let final_session = ctx
        .repository
        .session(class_id, PeriodType::Final)?
        .filter(|session| session.state == SessionState::Closed);
    let Some(final_session) = final_session else {
        validation.push(Message::blocking(
            MessageCode::FinalSessionNotClosed,
            "The final session of the class is not closed",
        ));
        return Ok(GuardResult::Blocked(validation));
    };
    let final_votes = final_votes_by_key(ctx.repository.final_votes(final_session.id)?);
    let proposals = ctx.repository.proposals(class_id, period)?;
    let scales = final_session.scales.unwrap_or(ctx.policy.scales);
    let session_id = ctx.workspace.session.id;

    let mut created = Vec::new();
    for student in ctx.workspace.students.values() {
        for subject in ctx
            .workspace
            .subjects
            .iter()
            .filter(|subject| subject.applies_to(student))
        {
            let Some(previous) = final_votes.get(&(student.id, subject.id)) else {
                continue;
            };
            let failing = matches!(
                subject.kind,
                SubjectKind::Standard | SubjectKind::CivicEducation
            ) && previous
                .grade
                .map(|grade| scales.for_kind(subject.kind).is_failing(grade))
                .unwrap_or(false);

            if !failing {
                created.push(FinalVote {
                    session: session_id,
                    ..previous.clone()
                });
                continue;
            }

            let proposal = proposals.iter().find(|proposal| {
                proposal.student == student.id
                    && proposal.subject == subject.id
                    && proposal.grade.is_some()
            });
            let Some(proposal) = proposal else {
                validation.push(
                    Message::blocking(
                        MessageCode::MissingMakeupProposal,
                        format!(
                            "Make-up grade proposal missing in {} for {}",
                            subject.name, student.name
                        ),
                    )
                    .for_student(student.id)
                    .for_subject(subject.id),
                );
                continue;
            };
            created.push(FinalVote {
                session: session_id,
                student: student.id,
                subject: subject.id,
                grade: proposal.grade,
                proposed: previous.grade,
                absence_hours: previous.absence_hours,
                recovery: previous.recovery,
                debt: proposal.debt.clone().or_else(|| previous.debt.clone()),
                deliberation: Deliberation::default(),
            });
        }
    }

    if validation.is_blocked() {
        return Ok(GuardResult::Blocked(validation));
    }

    let students: Vec<_> = ctx.workspace.students.values().cloned().collect();
    let workspace = &mut *ctx.workspace;
    workspace.session.roster = roster::snapshot(&students);
    workspace.session.scales = Some(scales);
    workspace.session.eligibility = final_session.eligibility.clone();
    for vote in created {
        workspace.votes.insert((vote.student, vote.subject), vote);
    }
    passed()
}

/// Only staff may send a make-up session back to the start.
fn cancel_start(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    if !ctx.actor.elevated {
        return Ok(GuardResult::Unauthorized);
    }
    shared::unfreeze(ctx)
}

fn accept_outcomes(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let final_votes = match ctx
        .repository
        .session(ctx.workspace.class.id, PeriodType::Final)?
    {
        Some(session) => final_votes_by_key(ctx.repository.final_votes(session.id)?),
        None => BTreeMap::new(),
    };
    let validation = outcomes::makeup_coherence(ctx.workspace, &final_votes);
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
    let validation = credits::credit_issues(ctx.workspace);
    if validation.is_blocked() {
        return Ok(GuardResult::Blocked(validation));
    }
    shared::open_minutes(ctx);
    Ok(GuardResult::Passed(validation))
}
