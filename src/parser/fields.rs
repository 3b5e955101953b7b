use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::rows::RawRow;
use crate::error::ExtractError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "1st")]
    First,
    #[serde(rename = "2nd")]
    Second,
    #[serde(rename = "3rd")]
    Third,
    Participated,
    Pending,
}

impl Position {
    pub const ALL: [Position; 5] = [
        Position::First,
        Position::Second,
        Position::Third,
        Position::Participated,
        Position::Pending,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Position::First => "1st",
            Position::Second => "2nd",
            Position::Third => "3rd",
            Position::Participated => "Participated",
            Position::Pending => "Pending",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Position::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ExtractError::InvalidContext(format!("unknown position {:?}", s)))
    }
}

/// Activity and result shared by every row of one uploaded roster.
#[derive(Debug, Clone)]
pub struct EventContext {
    activity: String,
    position: Position,
}

impl EventContext {
    pub fn new(activity: &str, position: Position) -> Result<Self, ExtractError> {
        let activity = activity.trim();
        if activity.is_empty() {
            return Err(ExtractError::InvalidContext("activity is empty".into()));
        }
        if position == Position::Pending {
            return Err(ExtractError::InvalidContext(
                "imports need a final position, not Pending".into(),
            ));
        }
        Ok(EventContext {
            activity: activity.to_string(),
            position,
        })
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn position(&self) -> Position {
        self.position
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateStudent {
    pub sr_no: usize,
    pub name: String,
    pub father_name: String,
    pub dob: String,
    pub university_reg_no: String,
    pub branch_year: String,
    pub matric_year: String,
    pub plus_two_year: String,
    pub first_admission_year: String,
    pub last_exam: String,
    pub last_exam_year: String,
    pub inter_college_graduate_years: String,
    pub inter_college_pg_years: String,
    pub inter_varsity_years: String,
    pub address_with_phone: String,
    pub signature_url: String,
    pub passport_photo_url: String,
    pub activity: String,
    pub position: Position,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub images_missing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    FatherName,
    Dob,
    UniversityRegNo,
    BranchYear,
    MatricYear,
    PlusTwoYear,
    FirstAdmissionYear,
    LastExam,
    LastExamYear,
    InterCollegeGraduateYears,
    InterCollegePgYears,
    InterVarsityYears,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub index: usize,
    pub field: Field,
    pub default: &'static str,
}

const fn col(index: usize, field: Field, default: &'static str) -> ColumnSpec {
    ColumnSpec {
        index,
        field,
        default,
    }
}

/// Fixed roster layout. Column 0 is the printed serial, 14 holds the
/// signature image and the last column the passport photo.
pub const COLUMN_MAP: &[ColumnSpec] = &[
    col(1, Field::Name, ""),
    col(2, Field::FatherName, ""),
    col(3, Field::Dob, "pending"),
    col(4, Field::UniversityRegNo, "A.F"),
    col(5, Field::BranchYear, ""),
    col(6, Field::MatricYear, ""),
    col(7, Field::PlusTwoYear, ""),
    col(8, Field::FirstAdmissionYear, ""),
    col(9, Field::LastExam, ""),
    col(10, Field::LastExamYear, ""),
    col(11, Field::InterCollegeGraduateYears, ""),
    col(12, Field::InterCollegePgYears, ""),
    col(13, Field::InterVarsityYears, ""),
];

/// Address text spans from here up to, not including, the last cell.
pub const ADDRESS_START: usize = 15;

/// Image references in discovery order: signature first, then photo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSlots {
    pub signature: String,
    pub photo: String,
}

impl ImageSlots {
    pub fn bind(urls: Vec<String>) -> Self {
        let mut urls = urls.into_iter();
        ImageSlots {
            signature: urls.next().unwrap_or_default(),
            photo: urls.next().unwrap_or_default(),
        }
    }
}

impl CandidateStudent {
    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::FatherName => &mut self.father_name,
            Field::Dob => &mut self.dob,
            Field::UniversityRegNo => &mut self.university_reg_no,
            Field::BranchYear => &mut self.branch_year,
            Field::MatricYear => &mut self.matric_year,
            Field::PlusTwoYear => &mut self.plus_two_year,
            Field::FirstAdmissionYear => &mut self.first_admission_year,
            Field::LastExam => &mut self.last_exam,
            Field::LastExamYear => &mut self.last_exam_year,
            Field::InterCollegeGraduateYears => &mut self.inter_college_graduate_years,
            Field::InterCollegePgYears => &mut self.inter_college_pg_years,
            Field::InterVarsityYears => &mut self.inter_varsity_years,
        };
        *slot = value;
    }
}

pub fn address(cells: &[String]) -> String {
    let end = cells.len().saturating_sub(1);
    if end <= ADDRESS_START {
        return String::new();
    }
    cells[ADDRESS_START..end].join(" ").trim().to_string()
}

pub fn map_row(row: &RawRow<'_>, ctx: &EventContext, images: ImageSlots) -> CandidateStudent {
    let mut student = CandidateStudent {
        sr_no: row.ordinal,
        name: String::new(),
        father_name: String::new(),
        dob: String::new(),
        university_reg_no: String::new(),
        branch_year: String::new(),
        matric_year: String::new(),
        plus_two_year: String::new(),
        first_admission_year: String::new(),
        last_exam: String::new(),
        last_exam_year: String::new(),
        inter_college_graduate_years: String::new(),
        inter_college_pg_years: String::new(),
        inter_varsity_years: String::new(),
        address_with_phone: address(&row.cells),
        signature_url: images.signature,
        passport_photo_url: images.photo,
        activity: ctx.activity().to_string(),
        position: ctx.position(),
        images_missing: false,
    };

    for spec in COLUMN_MAP {
        let value = row
            .cell(spec.index)
            .filter(|c| !c.is_empty())
            .unwrap_or(spec.default);
        student.set(spec.field, value.to_string());
    }

    student
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(cells: &[&str]) -> RawRow<'static> {
        RawRow {
            ordinal: 2,
            cells: cells.iter().map(|c| c.to_string()).collect(),
            markup: Vec::new(),
        }
    }

    fn football() -> EventContext {
        EventContext::new("Football", Position::First).unwrap()
    }

    #[test]
    fn column_map_is_ordered_and_unique() {
        let indexes: Vec<usize> = COLUMN_MAP.iter().map(|c| c.index).collect();
        assert_eq!(indexes, (1..=13).collect::<Vec<_>>());
        assert!(COLUMN_MAP.iter().all(|c| c.index < ADDRESS_START));
    }

    #[test]
    fn maps_fixed_columns() {
        let row = raw(&[
            "1", "Ravi Kumar", "Suresh Kumar", "2001-05-01", "1234567", "ME-3", "2017", "2019",
            "2019", "10+2", "2019", "2", "1", "1", "Amritsar, Phone 9876543210",
        ]);
        let s = map_row(&row, &football(), ImageSlots::default());
        assert_eq!(s.sr_no, 2);
        assert_eq!(s.name, "Ravi Kumar");
        assert_eq!(s.father_name, "Suresh Kumar");
        assert_eq!(s.university_reg_no, "1234567");
        assert_eq!(s.branch_year, "ME-3");
        assert_eq!(s.last_exam, "10+2");
        assert_eq!(s.inter_varsity_years, "1");
        // 15 cells: no address run
        assert_eq!(s.address_with_phone, "");
        assert_eq!(s.activity, "Football");
        assert_eq!(s.position, Position::First);
    }

    #[test]
    fn missing_cells_use_defaults() {
        let s = map_row(&raw(&["1", "Ravi", "", "", "7"]), &football(), ImageSlots::default());
        assert_eq!(s.dob, "pending");
        assert_eq!(s.father_name, "");
        assert_eq!(s.matric_year, "");

        let s = map_row(&raw(&["1", "Ravi"]), &football(), ImageSlots::default());
        assert_eq!(s.university_reg_no, "A.F");
    }

    #[test]
    fn address_spans_to_second_last_cell() {
        let mut cells: Vec<String> = (0..15).map(|i| i.to_string()).collect();
        cells.extend(["Village Rurka,", "Ludhiana", "Ph 98140", "<photo>"].map(String::from));
        assert_eq!(address(&cells), "Village Rurka, Ludhiana Ph 98140");

        let cells: Vec<String> = (0..16).map(|i| i.to_string()).collect();
        assert_eq!(address(&cells), "");
    }

    #[test]
    fn images_bind_by_order() {
        let slots = ImageSlots::bind(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(slots.signature, "a");
        assert_eq!(slots.photo, "b");
        let slots = ImageSlots::bind(vec!["a".into()]);
        assert_eq!(slots.photo, "");
    }

    #[test]
    fn positions_parse_and_serialize_like_the_ui() {
        assert_eq!("1st".parse::<Position>().unwrap(), Position::First);
        assert_eq!("participated".parse::<Position>().unwrap(), Position::Participated);
        assert!("4th".parse::<Position>().is_err());
        assert_eq!(serde_json::to_string(&Position::Third).unwrap(), "\"3rd\"");
    }

    #[test]
    fn context_rejects_pending_and_blank_activity() {
        assert!(EventContext::new("Football", Position::Pending).is_err());
        assert!(EventContext::new("   ", Position::First).is_err());
    }

    #[test]
    fn candidate_json_uses_camel_case() {
        let s = map_row(&raw(&["1", "Ravi", "", "", "7"]), &football(), ImageSlots::default());
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["universityRegNo"], "7");
        assert_eq!(json["passportPhotoUrl"], "");
        assert!(json.get("imagesMissing").is_none());
    }
}
