//! CSV import of grade proposals exported from the electronic register.

mod parser;

use std::io::Read;
use std::path::Path;

use super::domain::{ClassId, PeriodType, StudentId, SubjectId, TeacherId};
use super::votes::VoteProposal;

#[derive(Debug)]
pub enum ProposalImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidRecovery { line: u64, value: String },
}

impl std::fmt::Display for ProposalImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalImportError::Io(err) => write!(f, "failed to read proposal export: {}", err),
            ProposalImportError::Csv(err) => write!(f, "invalid proposal CSV data: {}", err),
            ProposalImportError::InvalidRecovery { line, value } => {
                write!(f, "unknown recovery mode '{}' on line {}", value, line)
            }
        }
    }
}

impl std::error::Error for ProposalImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProposalImportError::Io(err) => Some(err),
            ProposalImportError::Csv(err) => Some(err),
            ProposalImportError::InvalidRecovery { .. } => None,
        }
    }
}

impl From<std::io::Error> for ProposalImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ProposalImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Reads `Student,Subject,Teacher,Grade,Recovery,Debt` rows into proposals.
pub struct ProposalImporter;

impl ProposalImporter {
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        class_id: ClassId,
        period: PeriodType,
    ) -> Result<Vec<VoteProposal>, ProposalImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, class_id, period)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        class_id: ClassId,
        period: PeriodType,
    ) -> Result<Vec<VoteProposal>, ProposalImportError> {
        parser::parse_records(reader)?
            .into_iter()
            .map(|record| {
                let recovery = match record.recovery.as_deref() {
                    None => None,
                    Some(value) => Some(parser::parse_recovery(value).ok_or_else(|| {
                        ProposalImportError::InvalidRecovery {
                            line: record.line,
                            value: value.to_string(),
                        }
                    })?),
                };
                Ok(VoteProposal {
                    class_id,
                    period,
                    student: StudentId(record.student),
                    subject: SubjectId(record.subject),
                    teacher: record.teacher.map(TeacherId),
                    grade: record.grade,
                    recovery,
                    debt: record.debt,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::scrutinio::votes::RecoveryMode;
    use std::io::Cursor;

    const EXPORT: &str = "\
Student,Subject,Teacher,Grade,Recovery,Debt
1, 10, 100, 7, ,
2, 10, 100, 4, C, Equations and functions
3, 10, 100, , ,
";

    #[test]
    fn from_reader_maps_rows_to_proposals() {
        let proposals =
            ProposalImporter::from_reader(Cursor::new(EXPORT), ClassId(1), PeriodType::FirstTerm)
                .expect("export parses");

        assert_eq!(proposals.len(), 3);
        assert_eq!(proposals[0].grade, Some(7));
        assert_eq!(proposals[0].recovery, None);
        assert_eq!(proposals[1].recovery, Some(RecoveryMode::Course));
        assert_eq!(
            proposals[1].debt.as_deref(),
            Some("Equations and functions")
        );
        assert_eq!(proposals[2].grade, None);
        assert!(proposals
            .iter()
            .all(|proposal| proposal.teacher == Some(TeacherId(100))));
    }

    #[test]
    fn from_reader_rejects_unknown_recovery_codes() {
        let export = "Student,Subject,Teacher,Grade,Recovery,Debt\n1,10,100,4,Z,Gaps\n";
        match ProposalImporter::from_reader(Cursor::new(export), ClassId(1), PeriodType::Final) {
            Err(ProposalImportError::InvalidRecovery { line, value }) => {
                assert_eq!(line, 2);
                assert_eq!(value, "Z");
            }
            other => panic!("expected invalid recovery error, got {other:?}"),
        }
    }

    #[test]
    fn from_path_reports_missing_files() {
        let result = ProposalImporter::from_path(
            "./does-not-exist.csv",
            ClassId(1),
            PeriodType::FirstTerm,
        );
        assert!(matches!(result, Err(ProposalImportError::Io(_))));
    }
}
