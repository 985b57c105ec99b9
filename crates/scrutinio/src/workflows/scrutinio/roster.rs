use super::domain::{ClassInfo, PeriodType, Student};
use super::outcomes::Verdict;
use super::policy::GradingPolicy;
use super::repository::{GradingRepository, RepositoryError, RosterCriterion};
use super::session::{GradingSession, RosterSnapshot};

/// Students subject to a session.
///
/// Once the session has frozen its snapshot that list wins. Before that, regular
/// sessions take the students enrolled at the end of the period and make-up
/// sessions take the students the final session suspended (or deferred).
pub fn roster_students(
    repository: &dyn GradingRepository,
    class: &ClassInfo,
    session: &GradingSession,
    policy: &GradingPolicy,
) -> Result<Vec<Student>, RepositoryError> {
    if !session.roster.is_empty() {
        let listed = RosterCriterion::Listed(session.roster.students().to_vec());
        return repository.students(class.id, &listed);
    }

    let criterion = match session.period {
        PeriodType::FirstTerm | PeriodType::Final => {
            RosterCriterion::EnrolledOn(policy.calendar.roster_date(session.period))
        }
        PeriodType::MakeupExam | PeriodType::DeferredMakeup => {
            let verdict = if session.period == PeriodType::MakeupExam {
                Verdict::Suspended
            } else {
                Verdict::Deferred
            };
            let Some(final_session) = repository.session(class.id, PeriodType::Final)? else {
                return Ok(Vec::new());
            };
            let students = repository
                .outcomes(final_session.id)?
                .into_iter()
                .filter(|outcome| outcome.verdict == verdict)
                .map(|outcome| outcome.student)
                .collect();
            RosterCriterion::Listed(students)
        }
    };

    let mut students = repository.students(class.id, &criterion)?;
    students.sort_by_key(|student| student.id);
    Ok(students)
}

pub fn snapshot(students: &[Student]) -> RosterSnapshot {
    RosterSnapshot::new(students.iter().map(|student| student.id))
}
