use crate::infra::{
    seed_demo_class, ApiGradingService, FsDocumentStore, InMemoryAuditSink,
    InMemoryGradingRepository, DEMO_CLASS,
};
use chrono::{Local, NaiveDate, NaiveTime};
use clap::Args;
use scrutinio::error::AppError;
use scrutinio::workflows::scrutinio::{
    Actor, AttendancePolicy, ClosingForm, CreditCriterion, Deliberation, GradingPolicy,
    GradingRepository, GradingSessionService, MinutesBlueprint, OutcomeForm, PeriodType,
    PresenceForm, PresenceRoll, ProposalImporter, SchoolCalendar, SessionId, SessionServiceError,
    SessionState, Severity, StudentId, SubjectKind, TeacherAttendance, TransitionCommand,
    TransitionPayload, Verdict, VoteProposal, VoteUpdate,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SAMPLE_PROPOSALS: &str = "\
Student,Subject,Teacher,Grade,Recovery,Debt
101,1,201,7,,
101,2,202,7,,
101,3,203,25,,
102,1,201,6,,
102,2,202,5,C,Equazioni di secondo grado
103,1,201,8,,
103,2,202,8,,
103,3,203,24,,
";

/// Civic education and conduct grades agreed in council, per student.
const COUNCIL_GRADES: [(u32, u8, u8); 3] = [(101, 7, 8), (102, 7, 8), (103, 8, 9)];

const SAMPLE_MAKEUP_PROPOSALS: &str = "\
Student,Subject,Teacher,Grade,Recovery,Debt
102,2,202,6,,
";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Period to run: P, F, G or R (make-up periods run the final session first).
    #[arg(long, default_value = "F")]
    pub(crate) period: PeriodType,
    /// Date of the council meeting (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) session_date: Option<NaiveDate>,
    /// Folder for generated session documents. Defaults to a temporary folder.
    #[arg(long)]
    pub(crate) documents_dir: Option<PathBuf>,
    /// Register export replacing the built-in proposals of the selected period.
    #[arg(long)]
    pub(crate) proposals_csv: Option<PathBuf>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        period,
        session_date,
        documents_dir,
        proposals_csv,
    } = args;

    let session_date = session_date.unwrap_or_else(|| Local::now().date_naive());
    let documents_dir =
        documents_dir.unwrap_or_else(|| std::env::temp_dir().join("scrutinio-demo"));

    let repository = Arc::new(InMemoryGradingRepository::default());
    seed_demo_class(&repository).map_err(SessionServiceError::from)?;
    let audit = Arc::new(InMemoryAuditSink::default());
    let service = GradingSessionService::new(
        repository.clone(),
        Arc::new(FsDocumentStore::new(&documents_dir)),
        audit.clone(),
        GradingPolicy::new(
            SchoolCalendar::containing(session_date),
            AttendancePolicy::default(),
        ),
    );
    let demo = DemoSession {
        service: &service,
        repository: &repository,
        session_date,
    };

    println!("Grading session demo");
    println!(
        "- class {} | meeting on {} | documents in {}",
        DEMO_CLASS,
        session_date,
        documents_dir.display()
    );

    let completed = match period {
        PeriodType::FirstTerm => {
            demo.import(period, proposals_csv.as_deref(), SAMPLE_PROPOSALS)?;
            demo.first_term()?
        }
        PeriodType::Final => {
            demo.import(period, proposals_csv.as_deref(), SAMPLE_PROPOSALS)?;
            demo.final_term()?
        }
        PeriodType::MakeupExam | PeriodType::DeferredMakeup => {
            demo.import(PeriodType::Final, None, SAMPLE_PROPOSALS)?;
            demo.import(period, proposals_csv.as_deref(), SAMPLE_MAKEUP_PROPOSALS)?;
            demo.final_term()? && demo.makeup(period)?
        }
    };

    println!(
        "\n{} | {} audit entries recorded",
        if completed {
            "Session closed"
        } else {
            "Session left open"
        },
        audit.records().len()
    );
    Ok(())
}

struct DemoSession<'a> {
    service: &'a ApiGradingService,
    repository: &'a InMemoryGradingRepository,
    session_date: NaiveDate,
}

impl DemoSession<'_> {
    fn import(
        &self,
        period: PeriodType,
        path: Option<&Path>,
        sample: &str,
    ) -> Result<(), AppError> {
        let proposals: Vec<VoteProposal> = match path {
            Some(path) => ProposalImporter::from_path(path, DEMO_CLASS, period)?,
            None => ProposalImporter::from_reader(sample.as_bytes(), DEMO_CLASS, period)?,
        };
        let imported = self.service.import_proposals(proposals)?;
        println!(
            "- {imported} grade proposals loaded for period {period} ({})",
            if path.is_some() { "register export" } else { "sample data" }
        );
        Ok(())
    }

    fn first_term(&self) -> Result<bool, AppError> {
        let period = PeriodType::FirstTerm;
        println!("\nFirst-term session");
        Ok(self.advance(period, N, stage(1), none())?
            && self.advance(period, stage(1), stage(2), self.presence()?)?
            && self.grade_in_council(period, SubjectKind::CivicEducation)?
            && self.advance(period, stage(2), stage(3), none())?
            && self.grade_in_council(period, SubjectKind::Conduct)?
            && self.advance(period, stage(3), stage(4), none())?
            && self.advance(period, stage(4), stage(5), none())?
            && self.advance(period, stage(5), stage(6), none())?
            && self.write_minutes(period)?
            && self.advance(period, stage(6), C, closing(1))?)
    }

    fn final_term(&self) -> Result<bool, AppError> {
        let period = PeriodType::Final;
        println!("\nFinal session");
        Ok(self.advance(period, N, stage(1), none())?
            && self.advance(period, stage(1), stage(2), self.presence()?)?
            && self.advance(period, stage(2), stage(3), none())?
            && self.grade_in_council(period, SubjectKind::CivicEducation)?
            && self.advance(period, stage(3), stage(4), none())?
            && self.grade_in_council(period, SubjectKind::Conduct)?
            && self.advance(period, stage(4), stage(5), none())?
            && self.decide_outcomes(period)?
            && self.advance(period, stage(5), stage(6), none())?
            && self.assign_credits(period)?
            && self.advance(period, stage(6), stage(7), none())?
            && self.confirm_debt_notices(period)?
            && self.advance(period, stage(7), stage(8), none())?
            && self.write_minutes(period)?
            && self.advance(period, stage(8), C, closing(2))?)
    }

    fn makeup(&self, period: PeriodType) -> Result<bool, AppError> {
        println!("\nMake-up session ({period})");
        Ok(self.advance(period, N, stage(1), none())?
            && self.advance(period, stage(1), stage(2), self.presence()?)?
            && self.decide_outcomes(period)?
            && self.advance(period, stage(2), stage(3), none())?
            && self.assign_credits(period)?
            && self.advance(period, stage(3), stage(4), none())?
            && self.write_minutes(period)?
            && self.advance(period, stage(4), C, closing(3))?)
    }

    fn advance(
        &self,
        period: PeriodType,
        from: SessionState,
        to: SessionState,
        payload: TransitionPayload,
    ) -> Result<bool, AppError> {
        let report = self.service.transition(TransitionCommand {
            class_id: DEMO_CLASS,
            period,
            from,
            to,
            actor: Actor::teacher(201),
            payload,
        })?;

        println!(
            "- {} -> {}: {}",
            from,
            to,
            if report.applied { "applied" } else { "refused" }
        );
        for message in &report.messages {
            let label = match message.severity {
                Severity::Blocking => "blocking",
                Severity::Warning => "warning",
            };
            println!("    [{label}] {}", message.text);
        }
        Ok(report.applied)
    }

    fn presence(&self) -> Result<TransitionPayload, AppError> {
        let teachers = self
            .repository
            .teachers(DEMO_CLASS)
            .map_err(SessionServiceError::from)?;
        Ok(TransitionPayload {
            presence: Some(PresenceForm {
                date: Some(self.session_date),
                start_time: NaiveTime::from_hms_opt(14, 30, 0),
                roll: PresenceRoll {
                    principal_presides: true,
                    chair: None,
                    secretary: teachers.first().copied(),
                    attendance: teachers
                        .iter()
                        .map(|teacher| TeacherAttendance {
                            teacher: *teacher,
                            present: true,
                            substitute: None,
                        })
                        .collect(),
                },
            }),
            ..TransitionPayload::default()
        })
    }

    /// Records the council's civic education or conduct grades; conduct also gets a motivation.
    fn grade_in_council(&self, period: PeriodType, kind: SubjectKind) -> Result<bool, AppError> {
        let subjects = self
            .repository
            .subjects(DEMO_CLASS)
            .map_err(SessionServiceError::from)?;

        for subject in subjects.iter().filter(|subject| subject.kind == kind) {
            for (student, civics, conduct) in COUNCIL_GRADES {
                let (grade, deliberation) = match kind {
                    SubjectKind::Conduct => (
                        conduct,
                        Some(Deliberation {
                            motivation: "Behaviour consistent with the school rules".to_string(),
                            unanimous: Some(true),
                            dissenters: Vec::new(),
                        }),
                    ),
                    _ => (civics, None),
                };
                self.service.record_vote(
                    DEMO_CLASS,
                    period,
                    VoteUpdate {
                        student: StudentId(student),
                        subject: subject.id,
                        grade: Some(grade),
                        recovery: None,
                        debt: None,
                        deliberation,
                    },
                )?;
            }
        }
        Ok(true)
    }

    /// Suspends students with a failing grade and admits everyone else.
    fn decide_outcomes(&self, period: PeriodType) -> Result<bool, AppError> {
        let session = self.session(period)?;
        let subjects = self
            .repository
            .subjects(DEMO_CLASS)
            .map_err(SessionServiceError::from)?;
        let votes = self
            .repository
            .final_votes(session)
            .map_err(SessionServiceError::from)?;
        let scales = self.service.policy().scales;

        for student in self.service.roster(DEMO_CLASS, period)? {
            let failing = votes
                .iter()
                .filter(|vote| vote.student == student.id)
                .any(|vote| {
                    subjects
                        .iter()
                        .find(|subject| subject.id == vote.subject)
                        .filter(|subject| {
                            matches!(
                                subject.kind,
                                SubjectKind::Standard | SubjectKind::CivicEducation
                            )
                        })
                        .zip(vote.grade)
                        .map(|(subject, grade)| scales.for_kind(subject.kind).is_failing(grade))
                        .unwrap_or(false)
                });
            let verdict = if failing && !period.is_makeup() {
                Verdict::Suspended
            } else if failing {
                Verdict::NotAdmitted
            } else {
                Verdict::Admitted
            };
            let judgement = (verdict == Verdict::NotAdmitted)
                .then(|| "Learning gaps not recovered at the make-up exam".to_string());

            self.service.record_outcome(
                DEMO_CLASS,
                period,
                OutcomeForm {
                    student: student.id,
                    verdict,
                    unanimous: Some(true),
                    dissenters: Vec::new(),
                    judgement,
                    deferral_reason: None,
                },
            )?;
            println!("    {} -> {:?}", student.name, verdict);
        }
        Ok(true)
    }

    fn assign_credits(&self, period: PeriodType) -> Result<bool, AppError> {
        for student in self.service.roster(DEMO_CLASS, period)? {
            match self.service.assign_credit(
                DEMO_CLASS,
                period,
                student.id,
                vec![CreditCriterion::Attendance, CreditCriterion::Participation],
            ) {
                Ok(outcome) => println!(
                    "    {}: average {} | credit {}",
                    student.name,
                    outcome
                        .average
                        .map(|average| format!("{average:.2}"))
                        .unwrap_or_else(|| "-".to_string()),
                    outcome
                        .credit
                        .map(|credit| credit.to_string())
                        .unwrap_or_else(|| "-".to_string())
                ),
                Err(SessionServiceError::NotAdmitted(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(true)
    }

    fn confirm_debt_notices(&self, period: PeriodType) -> Result<bool, AppError> {
        let session = self.session(period)?;
        let suspended: Vec<StudentId> = self
            .repository
            .outcomes(session)
            .map_err(SessionServiceError::from)?
            .into_iter()
            .filter(|outcome| outcome.verdict == Verdict::Suspended)
            .map(|outcome| outcome.student)
            .collect();
        for student in suspended {
            self.service
                .confirm_notices(DEMO_CLASS, period, student, true, false)?;
        }
        Ok(true)
    }

    /// Leaves every argument blank so the standard wording is used.
    fn write_minutes(&self, period: PeriodType) -> Result<bool, AppError> {
        let class = self
            .repository
            .class(DEMO_CLASS)
            .map_err(SessionServiceError::from)?
            .ok_or(SessionServiceError::UnknownClass(DEMO_CLASS))?;
        let blueprint = MinutesBlueprint::standard(period);
        let actor = Actor::teacher(202);
        for step in blueprint.validable_for(class.year) {
            let report =
                self.service
                    .record_argument(DEMO_CLASS, period, step.index, "", &actor)?;
            println!(
                "    minutes step {}: {}",
                report.step,
                if report.validated { "validated" } else { "pending" }
            );
        }
        Ok(true)
    }

    fn session(&self, period: PeriodType) -> Result<SessionId, AppError> {
        let session = self
            .service
            .session(DEMO_CLASS, period)?
            .ok_or(SessionServiceError::SessionNotFound {
                class_id: DEMO_CLASS,
                period,
            })?;
        Ok(session.id)
    }
}

const N: SessionState = SessionState::NotStarted;
const C: SessionState = SessionState::Closed;

const fn stage(step: u8) -> SessionState {
    SessionState::Stage(step)
}

fn none() -> TransitionPayload {
    TransitionPayload::default()
}

fn closing(number: i64) -> TransitionPayload {
    TransitionPayload {
        closing: Some(ClosingForm {
            end_time: NaiveTime::from_hms_opt(16, 45, 0),
            minutes_number: Some(number),
        }),
        ..TransitionPayload::default()
    }
}
