use std::sync::Arc;

use super::common::*;
use crate::workflows::scrutinio::{
    Actor, AttendanceStatus, ClassId, Disposition, DispositionEntry, DocumentFolder, DocumentKey,
    DocumentKind, DocumentStore, GradingSession, GradingSessionService, MessageCode, OutcomeForm,
    PeriodType, PresenceForm, PresenceRoll, RepositoryError, SessionId, SessionServiceError,
    SessionState, Severity, TeacherAttendance, TransitionPayload, Verdict, VoteProposal,
    VoteUpdate, ANNULMENT_ACTION, AUDIT_CATEGORY,
};

const N: SessionState = SessionState::NotStarted;
const C: SessionState = SessionState::Closed;

fn stage(step: u8) -> SessionState {
    SessionState::Stage(step)
}

fn first_term_service() -> (
    TestService,
    Arc<MemoryRepository>,
    Arc<MemoryDocuments>,
    Arc<MemoryAudit>,
) {
    let repository = seeded_repository(3, 30);
    repository.seed_proposals(class_proposals(PeriodType::FirstTerm));
    build_service(repository)
}

fn run_first_term_to_close(service: &TestService) {
    let period = PeriodType::FirstTerm;
    let none = TransitionPayload::default;
    assert!(advance(service, period, N, stage(1), none()).applied);
    assert!(advance(service, period, stage(1), stage(2), presence_payload()).applied);
    grade_civics(service, period);
    assert!(advance(service, period, stage(2), stage(3), none()).applied);
    deliberate_conduct(service, period);
    assert!(advance(service, period, stage(3), stage(4), none()).applied);
    assert!(advance(service, period, stage(4), stage(5), none()).applied);
    assert!(advance(service, period, stage(5), stage(6), none()).applied);
    for step in [2, 4] {
        let report = service
            .record_argument(CLASS, period, step, "", &Actor::teacher(201))
            .expect("argument recorded");
        assert!(report.validated);
    }
    assert!(advance(service, period, stage(6), C, closing_payload(7)).applied);
}

#[test]
fn unknown_transitions_are_silent_no_ops() {
    let (service, repository, _, audit) = first_term_service();

    let skipped = advance(&service, PeriodType::FirstTerm, N, stage(3), Default::default());
    assert!(!skipped.applied);
    assert!(skipped.messages.is_empty());
    assert_eq!(skipped.state, N);

    let stale = advance(
        &service,
        PeriodType::FirstTerm,
        stage(1),
        stage(2),
        presence_payload(),
    );
    assert!(!stale.applied);
    assert!(stale.messages.is_empty());

    assert_eq!(repository.commits(), 0);
    assert!(audit.records().is_empty());
    assert_eq!(
        repository
            .stored_session(PeriodType::FirstTerm)
            .map(|session| session.state),
        Some(N)
    );
}

#[test]
fn blocked_start_changes_nothing() {
    let repository = seeded_repository(3, 30);
    let mut proposals = class_proposals(PeriodType::FirstTerm);
    proposals.retain(|proposal| !(proposal.student == ANNA && proposal.subject == ITALIAN));
    repository.seed_proposals(proposals);
    let (service, repository, _, audit) = build_service(repository);

    let report = advance(
        &service,
        PeriodType::FirstTerm,
        N,
        stage(1),
        Default::default(),
    );

    assert!(!report.applied);
    assert_eq!(report.state, N);
    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.messages[0].code, MessageCode::MissingGrade);
    assert_eq!(repository.commits(), 0);
    assert!(repository
        .stored_vote(PeriodType::FirstTerm, LUCA, MATH)
        .is_none());
    assert!(audit.records().is_empty());
}

#[test]
fn start_proceeds_with_annotation_warnings() {
    let repository = seeded_repository(3, 30);
    let mut proposals = class_proposals(PeriodType::FirstTerm);
    for proposal in proposals
        .iter_mut()
        .filter(|proposal| proposal.subject == ITALIAN)
    {
        proposal.grade = Some(5);
    }
    repository.seed_proposals(proposals);
    repository.set_absences(ANNA, ITALIAN, 6);
    let (service, repository, _, _) = build_service(repository);

    let report = advance(
        &service,
        PeriodType::FirstTerm,
        N,
        stage(1),
        Default::default(),
    );

    assert!(report.applied);
    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.messages[0].severity, Severity::Warning);
    assert_eq!(report.messages[0].code, MessageCode::MissingRecoveryMode);

    let session = repository
        .stored_session(PeriodType::FirstTerm)
        .expect("session stored");
    assert_eq!(session.roster.students(), &[ANNA, LUCA, SARA]);
    let vote = repository
        .stored_vote(PeriodType::FirstTerm, ANNA, ITALIAN)
        .expect("vote materialized");
    assert_eq!(vote.grade, Some(5));
    assert_eq!(vote.absence_hours, 6);
}

#[test]
fn start_leaves_civic_education_to_the_council() {
    let (service, repository, _, _) = first_term_service();
    let report = advance(&service, PeriodType::FirstTerm, N, stage(1), Default::default());
    assert!(report.applied);
    assert!(report.messages.is_empty());
    let civic = repository
        .stored_vote(PeriodType::FirstTerm, ANNA, CIVICS)
        .expect("civic vote created");
    assert_eq!(civic.grade, None);

    let repository = seeded_repository(3, 30);
    let mut proposals = class_proposals(PeriodType::FirstTerm);
    proposals.push(proposal(PeriodType::FirstTerm, ANNA, CIVICS, Some(8)));
    proposals.push(VoteProposal {
        teacher: Some(TEACHERS[1]),
        ..proposal(PeriodType::FirstTerm, ANNA, CIVICS, Some(6))
    });
    repository.seed_proposals(proposals);
    let (service, repository, _, _) = build_service(repository);

    let report = advance(&service, PeriodType::FirstTerm, N, stage(1), Default::default());
    assert!(report.applied);
    assert!(report.messages.is_empty());
    assert_eq!(
        repository
            .stored_vote(PeriodType::FirstTerm, ANNA, CIVICS)
            .and_then(|vote| vote.grade),
        None
    );

    let period = PeriodType::FirstTerm;
    assert!(advance(&service, period, stage(1), stage(2), presence_payload()).applied);
    let blocked = advance(&service, period, stage(2), stage(3), Default::default());
    assert!(!blocked.applied);
    assert_eq!(blocked.messages.len(), 3);
    assert!(blocked
        .messages
        .iter()
        .all(|message| message.code == MessageCode::MissingGrade
            && message.subject == Some(CIVICS)));
}

#[test]
fn presence_roll_reports_every_gap_at_once() {
    let (service, _, _, _) = first_term_service();
    advance(
        &service,
        PeriodType::FirstTerm,
        N,
        stage(1),
        Default::default(),
    );
    let payload = TransitionPayload {
        presence: Some(PresenceForm {
            date: None,
            start_time: None,
            roll: PresenceRoll {
                principal_presides: false,
                chair: None,
                secretary: None,
                attendance: vec![
                    TeacherAttendance {
                        teacher: TEACHERS[0],
                        present: true,
                        substitute: None,
                    },
                    TeacherAttendance {
                        teacher: TEACHERS[1],
                        present: false,
                        substitute: None,
                    },
                ],
            },
        }),
        ..TransitionPayload::default()
    };

    let report = advance(&service, PeriodType::FirstTerm, stage(1), stage(2), payload);

    assert!(!report.applied);
    assert_eq!(report.state, stage(1));
    let codes: Vec<MessageCode> = report.messages.iter().map(|message| message.code).collect();
    assert_eq!(
        codes,
        vec![
            MessageCode::MissingSessionDate,
            MessageCode::MissingStartTime,
            MessageCode::MissingChair,
            MessageCode::MissingSecretary,
            MessageCode::IncompletePresence,
            MessageCode::IncompletePresence,
        ]
    );
}

#[test]
fn first_term_runs_to_closure_with_one_audit_record_per_change() {
    let (service, repository, _, audit) = first_term_service();

    run_first_term_to_close(&service);

    let session = repository
        .stored_session(PeriodType::FirstTerm)
        .expect("session stored");
    assert_eq!(session.state, C);
    assert_eq!(session.minutes.number, Some(7));
    assert!(session.presence.is_some());
    for student in [ANNA, LUCA, SARA] {
        let outcome = repository
            .stored_outcome(PeriodType::FirstTerm, student)
            .expect("outcome defaulted");
        assert_eq!(outcome.verdict, Verdict::Admitted);
    }

    let records = audit.records();
    let transitions: Vec<_> = records
        .iter()
        .filter(|record| record.action == "Cambio stato")
        .collect();
    assert_eq!(transitions.len(), 7);
    assert_eq!(records.len(), 9);
    assert!(records
        .iter()
        .all(|record| record.category == AUDIT_CATEGORY && record.actor == TEACHERS[0]));
    assert_eq!(
        transitions
            .last()
            .and_then(|record| record.context.get("Stato finale"))
            .map(String::as_str),
        Some("C")
    );
    assert!(records
        .windows(2)
        .all(|pair| pair[0].recorded_at <= pair[1].recorded_at));
}

#[test]
fn reopening_needs_staff_and_no_sync_lock() {
    let (service, repository, documents, audit) = first_term_service();
    run_first_term_to_close(&service);
    let folder = DocumentFolder::new(&class_info(3, 30), PeriodType::FirstTerm);
    documents
        .write(
            &DocumentKey {
                folder: folder.clone(),
                kind: DocumentKind::Minutes,
            },
            b"%PDF",
        )
        .expect("document written");
    let audited = audit.records().len();
    let reopen = |actor: Actor| {
        service
            .transition(command(PeriodType::FirstTerm, C, stage(6), actor, Default::default()))
            .expect("transition runs")
    };

    let teacher = reopen(Actor::teacher(201));
    assert!(!teacher.applied);
    assert!(teacher.messages.is_empty());

    service
        .set_sync_lock(CLASS, PeriodType::FirstTerm, true)
        .expect("lock set");
    let locked = reopen(Actor::staff(900));
    assert!(!locked.applied);
    assert!(locked.messages.is_empty());
    assert_eq!(audit.records().len(), audited);
    assert_eq!(documents.count(&folder), 1);

    service
        .set_sync_lock(CLASS, PeriodType::FirstTerm, false)
        .expect("lock cleared");
    let staff = reopen(Actor::staff(900));
    assert!(staff.applied);
    assert_eq!(staff.state, stage(6));
    assert_eq!(documents.count(&folder), 0);
    let receipts = documents.receipts();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].backup.as_deref(), Some("BACKUP.1"));
    assert_eq!(receipts[0].moved, 1);
    assert_eq!(
        repository
            .stored_session(PeriodType::FirstTerm)
            .map(|session| session.state),
        Some(stage(6))
    );
    assert_eq!(audit.records().len(), audited + 1);
}

#[test]
fn inspection_is_idempotent_and_creates_nothing() {
    let repository = seeded_repository(3, 12);
    repository.seed_proposals(class_proposals(PeriodType::Final));
    repository.set_absences(SARA, MATH, 120);
    let (service, repository, _, _) = build_service(repository);

    let roster = service.roster(CLASS, PeriodType::Final).expect("roster");
    assert_eq!(roster.len(), 3);
    assert_eq!(
        service.roster(CLASS, PeriodType::Final).expect("roster"),
        roster
    );

    let overview = service
        .proposal_overview(CLASS, PeriodType::Final)
        .expect("overview");
    // civic education and conduct are not proposed by teachers
    assert_eq!(overview.proposals.len(), 8);
    assert!(overview.messages.is_empty());
    assert_eq!(
        service
            .proposal_overview(CLASS, PeriodType::Final)
            .expect("overview"),
        overview
    );

    // hours of a session not yet started are still zero
    let assessment = service.eligibility(CLASS).expect("assessment");
    assert_eq!(assessment.ceiling, 99);
    assert!(assessment
        .students
        .iter()
        .all(|entry| entry.status == AttendanceStatus::Eligible));
    assert_eq!(service.eligibility(CLASS).expect("assessment"), assessment);

    assert!(repository.stored_session(PeriodType::Final).is_none());
    assert_eq!(repository.commits(), 0);
}

#[test]
fn available_transitions_follow_the_current_state() {
    let (service, _, _, _) = first_term_service();
    assert_eq!(
        service
            .available_transitions(CLASS, PeriodType::Final)
            .expect("targets"),
        vec![stage(1)]
    );

    advance(
        &service,
        PeriodType::FirstTerm,
        N,
        stage(1),
        Default::default(),
    );
    assert_eq!(
        service
            .available_transitions(CLASS, PeriodType::FirstTerm)
            .expect("targets"),
        vec![N, stage(2)]
    );
}

#[test]
fn votes_are_editable_only_in_working_states() {
    let (service, _, _, _) = first_term_service();
    let update = VoteUpdate {
        student: ANNA,
        subject: MATH,
        grade: Some(8),
        recovery: None,
        debt: None,
        deliberation: None,
    };

    match service.record_vote(CLASS, PeriodType::FirstTerm, update.clone()) {
        Err(SessionServiceError::SessionNotFound { class_id, period }) => {
            assert_eq!(class_id, CLASS);
            assert_eq!(period, PeriodType::FirstTerm);
        }
        other => panic!("expected missing session, got {other:?}"),
    }

    run_first_term_to_close(&service);
    match service.record_vote(CLASS, PeriodType::FirstTerm, update) {
        Err(SessionServiceError::NotEditable(state)) => assert_eq!(state, C),
        other => panic!("expected closed session, got {other:?}"),
    }
}

#[test]
fn attendance_verdicts_cannot_be_recorded_by_hand() {
    let (service, _, _, _) = first_term_service();
    let form = OutcomeForm {
        student: ANNA,
        verdict: Verdict::Ineligible,
        unanimous: Some(true),
        dissenters: Vec::new(),
        judgement: None,
        deferral_reason: None,
    };

    match service.record_outcome(CLASS, PeriodType::Final, form) {
        Err(SessionServiceError::ReservedVerdict(Verdict::Ineligible)) => {}
        other => panic!("expected reserved verdict, got {other:?}"),
    }
}

#[test]
fn proposals_freeze_once_the_session_starts() {
    let (service, _, _, _) = first_term_service();
    advance(
        &service,
        PeriodType::FirstTerm,
        N,
        stage(1),
        Default::default(),
    );

    let late = vec![proposal(PeriodType::FirstTerm, ANNA, MATH, Some(9))];
    match service.import_proposals(late) {
        Err(SessionServiceError::NotEditable(state)) => assert_eq!(state, stage(1)),
        other => panic!("expected frozen proposals, got {other:?}"),
    }

    let other_period = vec![proposal(PeriodType::Final, ANNA, MATH, Some(9))];
    assert_eq!(service.import_proposals(other_period).expect("imported"), 1);
}

#[test]
fn waiver_keeps_an_over_ceiling_student_in_the_session() {
    let repository = seeded_repository(3, 12);
    repository.seed_proposals(class_proposals(PeriodType::Final));
    repository.set_absences(SARA, ITALIAN, 100);
    let (service, repository, _, _) = build_service(repository);
    let period = PeriodType::Final;
    let with = |dispositions: Vec<DispositionEntry>| TransitionPayload {
        dispositions,
        ..TransitionPayload::default()
    };
    let waiver = |justification: &str| DispositionEntry {
        student: SARA,
        disposition: Disposition::Waiver {
            justification: justification.to_string(),
        },
    };

    assert!(advance(&service, period, N, stage(1), Default::default()).applied);
    assert!(advance(&service, period, stage(1), stage(2), presence_payload()).applied);

    let assessment = service.eligibility(CLASS).expect("assessment");
    assert_eq!(assessment.ceiling, 99);
    assert_eq!(assessment.students[2].hours, 100);
    assert_eq!(assessment.students[2].status, AttendanceStatus::OverCeiling);

    let undecided = advance(&service, period, stage(2), stage(3), Default::default());
    assert!(!undecided.applied);
    assert_eq!(undecided.messages.len(), 1);
    assert_eq!(undecided.messages[0].code, MessageCode::MissingDisposition);

    let blank = advance(&service, period, stage(2), stage(3), with(vec![waiver(" ")]));
    assert_eq!(
        blank.messages[0].code,
        MessageCode::MissingWaiverJustification
    );

    let excluded = advance(
        &service,
        period,
        stage(2),
        stage(3),
        with(vec![DispositionEntry {
            student: SARA,
            disposition: Disposition::Ineligible,
        }]),
    );
    assert!(excluded.applied);
    assert_eq!(
        repository
            .stored_outcome(period, SARA)
            .map(|outcome| outcome.verdict),
        Some(Verdict::Ineligible)
    );
    assert_eq!(service.roster(CLASS, period).expect("roster").len(), 2);

    assert!(advance(&service, period, stage(3), stage(2), Default::default()).applied);
    let waived = advance(
        &service,
        period,
        stage(2),
        stage(3),
        with(vec![waiver("Documented hospital stay")]),
    );
    assert!(waived.applied);
    assert!(repository.stored_outcome(period, SARA).is_none());
    let roster: Vec<_> = service
        .roster(CLASS, period)
        .expect("roster")
        .into_iter()
        .map(|student| student.id)
        .collect();
    assert_eq!(roster, vec![ANNA, LUCA, SARA]);
    let partition = repository
        .stored_session(period)
        .and_then(|session| session.eligibility)
        .expect("partition frozen");
    assert!(partition.is_waived(SARA));
}

/// Final-session repository whose first term left Sara 100 hours absent in Italian.
fn with_first_term(state: SessionState) -> MemoryRepository {
    let first_term = SessionId(90);
    let repository = seeded_repository(3, 12);
    repository.seed_proposals(class_proposals(PeriodType::Final));
    {
        let mut store = repository.store();
        let mut session = GradingSession::new(first_term, CLASS, PeriodType::FirstTerm);
        session.state = state;
        store.sessions.insert((CLASS, PeriodType::FirstTerm), session);
        let mut absent = vote(SARA, ITALIAN, Some(7));
        absent.session = first_term;
        absent.absence_hours = 100;
        store.votes.insert((first_term, SARA, ITALIAN), absent);
    }
    repository
}

#[test]
fn first_term_absences_count_once_that_session_is_closed() {
    let period = PeriodType::Final;

    let (service, _, _, _) = build_service(with_first_term(stage(6)));
    let assessment = service.eligibility(CLASS).expect("assessment");
    assert_eq!(assessment.students[2].hours, 0);
    assert_eq!(assessment.students[2].status, AttendanceStatus::Eligible);
    assert!(advance(&service, period, N, stage(1), Default::default()).applied);
    assert!(advance(&service, period, stage(1), stage(2), presence_payload()).applied);
    assert!(advance(&service, period, stage(2), stage(3), Default::default()).applied);

    let (service, _, _, _) = build_service(with_first_term(C));
    let assessment = service.eligibility(CLASS).expect("assessment");
    assert_eq!(assessment.students[2].hours, 100);
    assert_eq!(assessment.students[2].status, AttendanceStatus::OverCeiling);
    assert!(advance(&service, period, N, stage(1), Default::default()).applied);
    assert!(advance(&service, period, stage(1), stage(2), presence_payload()).applied);
    let blocked = advance(&service, period, stage(2), stage(3), Default::default());
    assert!(!blocked.applied);
    assert_eq!(blocked.messages[0].code, MessageCode::MissingDisposition);
    assert_eq!(blocked.messages[0].student, Some(SARA));
}

#[test]
fn makeup_session_waits_for_the_closed_final_session() {
    let (service, _, _, _) = first_term_service();

    let report = advance(
        &service,
        PeriodType::MakeupExam,
        N,
        stage(1),
        Default::default(),
    );

    assert!(!report.applied);
    assert_eq!(report.messages[0].code, MessageCode::FinalSessionNotClosed);
}

#[test]
fn unknown_class_is_an_error() {
    let (service, _, _, _) = first_term_service();
    let mut request = command(
        PeriodType::FirstTerm,
        N,
        stage(1),
        Actor::teacher(201),
        Default::default(),
    );
    request.class_id = ClassId(99);

    match service.transition(request) {
        Err(SessionServiceError::UnknownClass(class)) => assert_eq!(class.0, 99),
        other => panic!("expected unknown class, got {other:?}"),
    }
}

#[test]
fn repository_outages_surface_as_errors() {
    let service = GradingSessionService::new(
        Arc::new(UnavailableRepository),
        Arc::new(MemoryDocuments::default()),
        Arc::new(MemoryAudit::default()),
        policy(),
    );

    match service.transition(command(
        PeriodType::FirstTerm,
        N,
        stage(1),
        Actor::teacher(201),
        Default::default(),
    )) {
        Err(SessionServiceError::Repository(RepositoryError::Unavailable(reason))) => {
            assert_eq!(reason, "database offline")
        }
        other => panic!("expected repository outage, got {other:?}"),
    }
}

#[test]
fn audit_outage_leaves_the_session_untouched() {
    let (service, repository, _, audit) = first_term_service();
    audit.set_offline(true);

    match service.transition(command(
        PeriodType::FirstTerm,
        N,
        stage(1),
        Actor::teacher(201),
        Default::default(),
    )) {
        Err(SessionServiceError::Audit(_)) => {}
        other => panic!("expected audit outage, got {other:?}"),
    }
    assert_eq!(repository.commits(), 0);
    assert_eq!(
        repository
            .stored_session(PeriodType::FirstTerm)
            .map(|session| session.state),
        Some(N)
    );
    assert!(repository
        .stored_vote(PeriodType::FirstTerm, ANNA, MATH)
        .is_none());

    audit.set_offline(false);
    assert!(advance(&service, PeriodType::FirstTerm, N, stage(1), Default::default()).applied);
    assert_eq!(audit.records().len(), 1);
}

#[test]
fn rejected_commit_is_annulled_in_the_audit_trail() {
    let (service, repository, _, audit) = first_term_service();
    repository.store().reject_commits = true;

    match service.transition(command(
        PeriodType::FirstTerm,
        N,
        stage(1),
        Actor::teacher(201),
        Default::default(),
    )) {
        Err(SessionServiceError::Repository(RepositoryError::Unavailable(_))) => {}
        other => panic!("expected rejected write, got {other:?}"),
    }

    let records = audit.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].action, "Cambio stato");
    assert_eq!(records[1].action, ANNULMENT_ACTION);
    assert_eq!(
        records[1].context.get("Azione annullata").map(String::as_str),
        Some("Cambio stato")
    );
    assert_eq!(
        records[1].context.get("Stato finale"),
        records[0].context.get("Stato finale")
    );
    assert_eq!(
        repository
            .stored_session(PeriodType::FirstTerm)
            .map(|session| session.state),
        Some(N)
    );
}
