use std::collections::BTreeSet;

use serde::Serialize;

use crate::record::{Field, Record};

/// Sorted distinct values for each filterable field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldOptions {
    pub drugs: Vec<String>,
    pub brands: Vec<String>,
    pub formulations: Vec<String>,
    pub indications: Vec<String>,
    pub treatment_phases: Vec<String>,
    pub hospital_types: Vec<String>,
}

impl FieldOptions {
    pub fn get(&self, field: Field) -> &[String] {
        match field {
            Field::Drug => &self.drugs,
            Field::Brand => &self.brands,
            Field::Formulation => &self.formulations,
            Field::Indication => &self.indications,
            Field::TreatmentPhase => &self.treatment_phases,
            Field::HospitalType => &self.hospital_types,
        }
    }

    pub fn set(&mut self, field: Field, values: Vec<String>) {
        let slot = match field {
            Field::Drug => &mut self.drugs,
            Field::Brand => &mut self.brands,
            Field::Formulation => &mut self.formulations,
            Field::Indication => &mut self.indications,
            Field::TreatmentPhase => &mut self.treatment_phases,
            Field::HospitalType => &mut self.hospital_types,
        };
        *slot = values;
    }

    /// Builds every field's list from a single pass over `records`.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut sets: [BTreeSet<&'a str>; 6] = Default::default();
        for record in records {
            for field in Field::ALL {
                sets[field.index()].insert(record.value(field));
            }
        }

        let mut out = Self::default();
        for field in Field::ALL {
            out.set(field, sorted_owned(&sets[field.index()]));
        }
        out
    }
}

pub(crate) fn sorted_owned(set: &BTreeSet<&str>) -> Vec<String> {
    set.iter().map(|s| s.to_string()).collect()
}

/// An immutable table of records plus its derived option lists.
///
/// The only way to build one is from a complete record sequence, so the option lists can never
/// drift from the records they were computed from.
#[derive(Debug, Default)]
pub struct Dataset {
    records: Vec<Record>,
    options: FieldOptions,
}

impl Dataset {
    pub fn new(records: Vec<Record>) -> Self {
        let options = FieldOptions::from_records(&records);
        Self { records, options }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::record::Record;

    pub fn record(drug: &str, brand: &str) -> Record {
        Record {
            drug: drug.to_string(),
            brand: brand.to_string(),
            formulation: "Injection 40 mg".to_string(),
            indication: "Rheumatoid arthritis".to_string(),
            treatment_phase: "Initial 1".to_string(),
            hospital_type: "Any".to_string(),
            pbs_code: format!("{drug}{brand}01"),
            streamlined_code: None,
            authority_method: "Written".to_string(),
            online_application: false,
            schedule_year: 2024,
            schedule_month: "AUGUST".to_string(),
        }
    }
}
