use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a class group (e.g. "3A").
    ClassId
);
numeric_id!(StudentId);
numeric_id!(SubjectId);
numeric_id!(TeacherId);
numeric_id!(
    /// Identifier assigned when a grading session is first created.
    SessionId
);

/// Kind of grading session run for a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    FirstTerm,
    Final,
    MakeupExam,
    DeferredMakeup,
}

impl PeriodType {
    pub const fn code(self) -> char {
        match self {
            Self::FirstTerm => 'P',
            Self::Final => 'F',
            Self::MakeupExam => 'G',
            Self::DeferredMakeup => 'R',
        }
    }

    /// Decodes the register's period codes, one per session key. Second-term and
    /// previous-year deferred sessions have no variant of their own and are refused.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "P" => Some(Self::FirstTerm),
            "F" => Some(Self::Final),
            "G" => Some(Self::MakeupExam),
            "R" => Some(Self::DeferredMakeup),
            _ => None,
        }
    }

    pub const fn is_makeup(self) -> bool {
        matches!(self, Self::MakeupExam | Self::DeferredMakeup)
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for PeriodType {
    type Err = DomainParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some(period) = Self::from_code(value) {
            return Ok(period);
        }

        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "first_term" => Ok(Self::FirstTerm),
            "final" => Ok(Self::Final),
            "makeup_exam" => Ok(Self::MakeupExam),
            "deferred_makeup" => Ok(Self::DeferredMakeup),
            _ => Err(DomainParseError::Period(value.to_string())),
        }
    }
}

/// Current position of a session inside its period graph.
///
/// Serialized with the register's tokens: `N`, `1`..`8`, `C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SessionState {
    NotStarted,
    Stage(u8),
    Closed,
}

impl SessionState {
    pub fn token(self) -> String {
        match self {
            Self::NotStarted => "N".to_string(),
            Self::Stage(step) => step.to_string(),
            Self::Closed => "C".to_string(),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for SessionState {
    type Err = DomainParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "N" | "n" => Ok(Self::NotStarted),
            "C" | "c" => Ok(Self::Closed),
            other => match other.parse::<u8>() {
                Ok(step) if (1..=9).contains(&step) => Ok(Self::Stage(step)),
                _ => Err(DomainParseError::State(value.to_string())),
            },
        }
    }
}

impl TryFrom<String> for SessionState {
    type Error = DomainParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionState> for String {
    fn from(value: SessionState) -> Self {
        value.token()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainParseError {
    #[error("unknown period '{0}'")]
    Period(String),
    #[error("unknown session state '{0}'")]
    State(String),
}

/// Subject families, each graded on its own scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// Religion or the alternative activity; only for students who opted in.
    Religion,
    Standard,
    CivicEducation,
    Conduct,
}

impl SubjectKind {
    /// Civic education and conduct are graded in council and start every session empty.
    pub const fn has_register_proposals(self) -> bool {
        matches!(self, Self::Religion | Self::Standard)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub kind: SubjectKind,
    pub counts_toward_average: bool,
}

impl Subject {
    /// Whether the subject is graded for the given student.
    pub fn applies_to(&self, student: &Student) -> bool {
        self.kind != SubjectKind::Religion || student.religion_opt_in
    }
}

/// Numeric scale for one subject family. `min` doubles as the "not classified" grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingScale {
    pub min: u8,
    pub max: u8,
    pub pass: u8,
}

impl GradingScale {
    pub const fn new(min: u8, max: u8, pass: u8) -> Self {
        Self { min, max, pass }
    }

    pub const fn contains(&self, grade: u8) -> bool {
        grade >= self.min && grade <= self.max
    }

    pub const fn is_failing(&self, grade: u8) -> bool {
        grade < self.pass
    }

    pub const fn is_unclassified(&self, grade: u8) -> bool {
        grade == self.min
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingScales {
    pub religion: GradingScale,
    pub standard: GradingScale,
    pub civic_education: GradingScale,
    pub conduct: GradingScale,
}

impl GradingScales {
    pub const fn for_kind(&self, kind: SubjectKind) -> GradingScale {
        match kind {
            SubjectKind::Religion => self.religion,
            SubjectKind::Standard => self.standard,
            SubjectKind::CivicEducation => self.civic_education,
            SubjectKind::Conduct => self.conduct,
        }
    }
}

impl Default for GradingScales {
    fn default() -> Self {
        Self {
            religion: GradingScale::new(20, 27, 23),
            standard: GradingScale::new(0, 10, 6),
            civic_education: GradingScale::new(2, 10, 6),
            conduct: GradingScale::new(4, 10, 6),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: ClassId,
    /// Year level, 1 through 5.
    pub year: u8,
    pub section: String,
    pub weekly_hours: u16,
}

impl ClassInfo {
    pub fn label(&self) -> String {
        format!("{}{}", self.year, self.section)
    }

    pub const fn is_graduating(&self) -> bool {
        self.year == 5
    }
}

/// Credits already earned in earlier years.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousCredits {
    pub year3: Option<u8>,
    pub year4: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub religion_opt_in: bool,
    /// On an exchange programme abroad for the whole period.
    #[serde(default)]
    pub abroad: bool,
    #[serde(default)]
    pub previous_credits: PreviousCredits,
    /// Absence hours accrued in another class or school.
    #[serde(default)]
    pub extra_absence_hours: u32,
}

/// Who is asking for an operation, and with which capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: TeacherId,
    /// Staff capability; required to reopen closed sessions.
    #[serde(default)]
    pub elevated: bool,
    #[serde(default)]
    pub ip: Option<String>,
}

impl Actor {
    pub fn teacher(id: u32) -> Self {
        Self {
            id: TeacherId(id),
            elevated: false,
            ip: None,
        }
    }

    pub fn staff(id: u32) -> Self {
        Self {
            id: TeacherId(id),
            elevated: true,
            ip: None,
        }
    }
}
