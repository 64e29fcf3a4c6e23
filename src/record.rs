use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::PBS_ITEM_URL_BASE;

/// One PBS authority entry for a biologic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub drug: String,
    pub brand: String,
    pub formulation: String,
    pub indication: String,
    pub treatment_phase: String,
    pub hospital_type: String,
    pub pbs_code: String,
    pub streamlined_code: Option<String>,
    pub authority_method: String,
    pub online_application: bool,
    pub schedule_year: i32,
    pub schedule_month: String,
}

impl Record {
    pub fn value(&self, field: Field) -> &str {
        match field {
            Field::Drug => &self.drug,
            Field::Brand => &self.brand,
            Field::Formulation => &self.formulation,
            Field::Indication => &self.indication,
            Field::TreatmentPhase => &self.treatment_phase,
            Field::HospitalType => &self.hospital_type,
        }
    }

    pub fn pbs_url(&self) -> String {
        format!("{PBS_ITEM_URL_BASE}/{}", self.pbs_code)
    }
}

/// The six categorical columns a user can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Drug,
    Brand,
    Formulation,
    Indication,
    TreatmentPhase,
    HospitalType,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Drug,
        Field::Brand,
        Field::Formulation,
        Field::Indication,
        Field::TreatmentPhase,
        Field::HospitalType,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Field::Drug => "drug",
            Field::Brand => "brand",
            Field::Formulation => "formulation",
            Field::Indication => "indication",
            Field::TreatmentPhase => "treatment_phase",
            Field::HospitalType => "hospital_type",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lenient boolean parsing for flag columns that arrive as text.
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pbs_url_links_the_item_page() {
        let record = crate::dataset::fixtures::record("adalimumab", "Humira");
        assert_eq!(
            record.pbs_url(),
            "https://www.pbs.gov.au/medicine/item/adalimumabHumira01"
        );
    }

    #[test]
    fn field_names_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_name(field.name()), Some(field));
        }
        assert_eq!(Field::from_name("Drug"), None);
        assert_eq!(Field::from_name("pbs_code"), None);
    }

    #[test]
    fn field_index_matches_position() {
        for (i, field) in Field::ALL.into_iter().enumerate() {
            assert_eq!(field.index(), i);
        }
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool_flag(" TRUE "), Some(true));
        assert_eq!(parse_bool_flag("0"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
