//! Verdict types
//!
//! Every curation classification is a closed enum with an explicit
//! "not yet checked" variant. Text verdicts are stored under their
//! SCREAMING_SNAKE_CASE names, the pathogenicity class as an integer 0..=5.

use std::fmt;
use std::str::FromStr;

use hl_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Declares a text-stored verdict enum with its storage names
macro_rules! text_verdict {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            /// All values, "not checked" first
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Storage name
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        "Unknown {} value: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_verdict! {
    /// In-silico check (e.g. by looking at the alignment)
    Insilico {
        NotChecked => "NOT_CHECKED",
        Ok => "OK",
        Suspect => "SUSPECT",
        NotOk => "NOT_OK",
    }
}

text_verdict! {
    /// Whether the variant goes into the report
    Reporting {
        NotChecked => "NOT_CHECKED",
        Yes => "YES",
        No => "NO",
    }
}

text_verdict! {
    /// Lab validation with another technique (e.g. Sanger sequencing)
    Validation {
        NotChecked => "NOT_CHECKED",
        Validated => "VALIDATED",
        Suspect => "SUSPECT",
        Invalidated => "INVALIDATED",
    }
}

text_verdict! {
    /// Mosaicism call
    Mosaicism {
        NotChecked => "NOT_CHECKED",
        Somatic => "SOMATIC",
        Dubious => "DUBIOUS",
        Germline => "GERMLINE",
    }
}

text_verdict! {
    /// Segregation call within the family
    Segregation {
        NotChecked => "NOT_CHECKED",
        Single => "SINGLE",
        Coseg => "COSEG",
        Carriers => "CARRIERS",
        NoCoseg => "NO_COSEG",
        NoCosegOther => "NO_COSEG_OTHER",
    }
}

/// Pathogenicity class, stored as 0 (not evaluated) to 5
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Pathogenicity {
    #[default]
    NotEvaluated,
    TypeI,
    TypeII,
    TypeIII,
    TypeIV,
    TypeV,
}

impl Pathogenicity {
    /// The five counted classes
    pub const CLASSES: [Pathogenicity; 5] = [
        Pathogenicity::TypeI,
        Pathogenicity::TypeII,
        Pathogenicity::TypeIII,
        Pathogenicity::TypeIV,
        Pathogenicity::TypeV,
    ];

    /// Integer stored in `variant_evaluations.evaluation`
    pub fn code(self) -> i64 {
        match self {
            Pathogenicity::NotEvaluated => 0,
            Pathogenicity::TypeI => 1,
            Pathogenicity::TypeII => 2,
            Pathogenicity::TypeIII => 3,
            Pathogenicity::TypeIV => 4,
            Pathogenicity::TypeV => 5,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Pathogenicity::NotEvaluated),
            1 => Ok(Pathogenicity::TypeI),
            2 => Ok(Pathogenicity::TypeII),
            3 => Ok(Pathogenicity::TypeIII),
            4 => Ok(Pathogenicity::TypeIV),
            5 => Ok(Pathogenicity::TypeV),
            other => Err(Error::InvalidInput(format!("Unknown evaluation class: {}", other))),
        }
    }

    /// Position in the counter array, None when not evaluated
    pub fn counter_index(self) -> Option<usize> {
        match self {
            Pathogenicity::NotEvaluated => None,
            other => Some(other.code() as usize - 1),
        }
    }

    /// Wording used in history lines
    pub fn label(self) -> &'static str {
        match self {
            Pathogenicity::NotEvaluated => "not evaluated",
            Pathogenicity::TypeI => "type I",
            Pathogenicity::TypeII => "type II",
            Pathogenicity::TypeIII => "type III",
            Pathogenicity::TypeIV => "type IV",
            Pathogenicity::TypeV => "type V",
        }
    }
}

impl FromStr for Pathogenicity {
    type Err = Error;

    /// Accepts `0`..`5`, roman numerals (`III`, `type III`) and `none`
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase();
        let normalized = normalized.strip_prefix("TYPE").unwrap_or(&normalized).trim();
        match normalized {
            "0" | "NONE" | "NOT_EVALUATED" | "NOT EVALUATED" => Ok(Pathogenicity::NotEvaluated),
            "1" | "I" => Ok(Pathogenicity::TypeI),
            "2" | "II" => Ok(Pathogenicity::TypeII),
            "3" | "III" => Ok(Pathogenicity::TypeIII),
            "4" | "IV" => Ok(Pathogenicity::TypeIV),
            "5" | "V" => Ok(Pathogenicity::TypeV),
            _ => Err(Error::InvalidInput(format!("Unknown evaluation class: {}", s))),
        }
    }
}

impl fmt::Display for Pathogenicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Private "of interest" flag, stored as NULL / 1 / 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Interest {
    #[default]
    Unset,
    OfInterest,
    NotInteresting,
}

impl Interest {
    pub fn to_db(self) -> Option<bool> {
        match self {
            Interest::Unset => None,
            Interest::OfInterest => Some(true),
            Interest::NotInteresting => Some(false),
        }
    }

    pub fn from_db(value: Option<bool>) -> Self {
        match value {
            None => Interest::Unset,
            Some(true) => Interest::OfInterest,
            Some(false) => Interest::NotInteresting,
        }
    }
}

impl FromStr for Interest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unset" | "none" | "null" => Ok(Interest::Unset),
            "yes" | "true" | "1" | "of_interest" => Ok(Interest::OfInterest),
            "no" | "false" | "0" | "not_interesting" => Ok(Interest::NotInteresting),
            other => Err(Error::InvalidInput(format!("Unknown interest flag: {}", other))),
        }
    }
}

/// Columns of the VariantEvaluation family that carry `_username` / `_date`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationField {
    Evaluation,
    CheckInsilico,
    Reporting,
    CheckValidatedVariant,
    CheckSomaticVariant,
    CheckSegregation,
    EvaluationComments,
}

impl EvaluationField {
    pub const ALL: [EvaluationField; 7] = [
        EvaluationField::Evaluation,
        EvaluationField::CheckInsilico,
        EvaluationField::Reporting,
        EvaluationField::CheckValidatedVariant,
        EvaluationField::CheckSomaticVariant,
        EvaluationField::CheckSegregation,
        EvaluationField::EvaluationComments,
    ];

    /// Column name in `variant_evaluations`
    pub fn column(self) -> &'static str {
        match self {
            EvaluationField::Evaluation => "evaluation",
            EvaluationField::CheckInsilico => "check_insilico",
            EvaluationField::Reporting => "reporting",
            EvaluationField::CheckValidatedVariant => "check_validated_variant",
            EvaluationField::CheckSomaticVariant => "check_somatic_variant",
            EvaluationField::CheckSegregation => "check_segregation",
            EvaluationField::EvaluationComments => "evaluation_comments",
        }
    }

    pub fn username_column(self) -> String {
        format!("{}_username", self.column())
    }

    pub fn date_column(self) -> String {
        format!("{}_date", self.column())
    }

    /// Subject of history lines
    pub fn description(self) -> &'static str {
        match self {
            EvaluationField::Evaluation => "Evaluation",
            other => other.column(),
        }
    }
}

impl FromStr for EvaluationField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        EvaluationField::ALL
            .into_iter()
            .find(|f| f.column() == wanted)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown evaluation field: {}", s)))
    }
}

/// A value bound for one VariantEvaluation column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationValue {
    Evaluation(Pathogenicity),
    Insilico(Insilico),
    Reporting(Reporting),
    Validation(Validation),
    Mosaicism(Mosaicism),
    Segregation(Segregation),
    Comments(String),
}

/// Storage representation of a verdict value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Integer(i64),
    Text(String),
}

impl EvaluationValue {
    /// Parse a value for the given field from its textual form
    pub fn parse(field: EvaluationField, raw: &str) -> Result<Self> {
        Ok(match field {
            EvaluationField::Evaluation => EvaluationValue::Evaluation(raw.parse()?),
            EvaluationField::CheckInsilico => EvaluationValue::Insilico(raw.parse()?),
            EvaluationField::Reporting => EvaluationValue::Reporting(raw.parse()?),
            EvaluationField::CheckValidatedVariant => EvaluationValue::Validation(raw.parse()?),
            EvaluationField::CheckSomaticVariant => EvaluationValue::Mosaicism(raw.parse()?),
            EvaluationField::CheckSegregation => EvaluationValue::Segregation(raw.parse()?),
            EvaluationField::EvaluationComments => EvaluationValue::Comments(raw.to_string()),
        })
    }

    pub fn field(&self) -> EvaluationField {
        match self {
            EvaluationValue::Evaluation(_) => EvaluationField::Evaluation,
            EvaluationValue::Insilico(_) => EvaluationField::CheckInsilico,
            EvaluationValue::Reporting(_) => EvaluationField::Reporting,
            EvaluationValue::Validation(_) => EvaluationField::CheckValidatedVariant,
            EvaluationValue::Mosaicism(_) => EvaluationField::CheckSomaticVariant,
            EvaluationValue::Segregation(_) => EvaluationField::CheckSegregation,
            EvaluationValue::Comments(_) => EvaluationField::EvaluationComments,
        }
    }

    pub fn sql_value(&self) -> SqlValue {
        match self {
            EvaluationValue::Evaluation(p) => SqlValue::Integer(p.code()),
            EvaluationValue::Insilico(v) => SqlValue::Text(v.as_str().to_string()),
            EvaluationValue::Reporting(v) => SqlValue::Text(v.as_str().to_string()),
            EvaluationValue::Validation(v) => SqlValue::Text(v.as_str().to_string()),
            EvaluationValue::Mosaicism(v) => SqlValue::Text(v.as_str().to_string()),
            EvaluationValue::Segregation(v) => SqlValue::Text(v.as_str().to_string()),
            EvaluationValue::Comments(text) => SqlValue::Text(text.clone()),
        }
    }

    /// Value as shown in table cells
    pub fn display_value(&self) -> String {
        match self.sql_value() {
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Text(t) => t,
        }
    }

    /// True for a write to the pathogenicity class
    pub fn is_classification(&self) -> bool {
        matches!(self, EvaluationValue::Evaluation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_verdict_round_trip_names() {
        assert_eq!("not_ok".parse::<Insilico>().unwrap(), Insilico::NotOk);
        assert_eq!(Segregation::NoCosegOther.as_str(), "NO_COSEG_OTHER");
        assert_eq!(Validation::default(), Validation::NotChecked);
        assert!("MAYBE".parse::<Reporting>().is_err());
    }

    #[test]
    fn test_not_checked_listed_first() {
        assert_eq!(Mosaicism::ALL[0], Mosaicism::NotChecked);
        assert_eq!(Segregation::ALL.len(), 6);
    }

    #[test]
    fn test_pathogenicity_parsing() {
        assert_eq!("III".parse::<Pathogenicity>().unwrap(), Pathogenicity::TypeIII);
        assert_eq!("type v".parse::<Pathogenicity>().unwrap(), Pathogenicity::TypeV);
        assert_eq!("0".parse::<Pathogenicity>().unwrap(), Pathogenicity::NotEvaluated);
        assert!("6".parse::<Pathogenicity>().is_err());
        assert!(Pathogenicity::from_code(7).is_err());
    }

    #[test]
    fn test_counter_index() {
        assert_eq!(Pathogenicity::NotEvaluated.counter_index(), None);
        assert_eq!(Pathogenicity::TypeI.counter_index(), Some(0));
        assert_eq!(Pathogenicity::TypeV.counter_index(), Some(4));
    }

    #[test]
    fn test_interest_db_mapping() {
        assert_eq!(Interest::from_db(None), Interest::Unset);
        assert_eq!(Interest::OfInterest.to_db(), Some(true));
        assert_eq!("no".parse::<Interest>().unwrap(), Interest::NotInteresting);
    }

    #[test]
    fn test_value_parse_follows_field() {
        let value = EvaluationValue::parse(EvaluationField::CheckSomaticVariant, "germline").unwrap();
        assert_eq!(value, EvaluationValue::Mosaicism(Mosaicism::Germline));
        assert_eq!(value.field().column(), "check_somatic_variant");
        assert_eq!(value.sql_value(), SqlValue::Text("GERMLINE".to_string()));
        assert_eq!(
            EvaluationValue::Evaluation(Pathogenicity::TypeIV).sql_value(),
            SqlValue::Integer(4)
        );
    }

    #[test]
    fn test_field_descriptions() {
        assert_eq!(EvaluationField::Evaluation.description(), "Evaluation");
        assert_eq!(EvaluationField::Reporting.description(), "reporting");
        assert_eq!("check_segregation".parse::<EvaluationField>().unwrap(), EvaluationField::CheckSegregation);
        assert_eq!(EvaluationField::CheckInsilico.username_column(), "check_insilico_username");
    }
}
