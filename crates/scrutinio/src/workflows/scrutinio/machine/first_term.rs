use super::shared::{self, passed, verdict};
use super::{stage, GuardResult, TransitionContext, TransitionResult, TransitionTable, C, N};
use crate::workflows::scrutinio::domain::PeriodType;
use crate::workflows::scrutinio::outcomes::Verdict;
use crate::workflows::scrutinio::votes;

pub(super) fn register(table: &mut TransitionTable) {
    let period = PeriodType::FirstTerm;
    table.register(period, N, stage(1), shared::start_session);
    table.register(period, stage(1), N, shared::unfreeze);
    table.register(period, stage(1), stage(2), shared::record_presence);
    table.register(period, stage(2), stage(1), shared::revert);
    table.register(period, stage(2), stage(3), shared::civic_grades);
    table.register(period, stage(3), stage(2), shared::revert);
    table.register(period, stage(3), stage(4), shared::conduct_deliberation);
    table.register(period, stage(4), stage(3), shared::revert);
    table.register(period, stage(4), stage(5), finalize_votes);
    table.register(period, stage(5), stage(4), shared::revert);
    table.register(period, stage(5), stage(6), debt_communications);
    table.register(period, stage(6), stage(5), shared::reset_minutes);
    table.register(period, stage(6), C, shared::close);
    table.register(period, C, stage(6), shared::reopen);
}

/// Every annotation is mandatory; students without an outcome default to admitted.
fn finalize_votes(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let validation = votes::finalization_issues(ctx.workspace);
    if validation.is_blocked() {
        return Ok(GuardResult::Blocked(validation));
    }

    for student in ctx.workspace.active_roster() {
        if !ctx.workspace.outcomes.contains_key(&student) {
            let outcome = shared::new_outcome(ctx, student, Verdict::Admitted);
            ctx.workspace.insert_outcome(outcome);
        }
    }
    passed()
}

fn debt_communications(ctx: &mut TransitionContext<'_>) -> TransitionResult {
    let result = verdict(shared::debt_communication_issues(ctx));
    if matches!(result, GuardResult::Passed(_)) {
        shared::open_minutes(ctx);
    }
    Ok(result)
}
