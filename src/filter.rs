//! Conjunctive filtering over the six categorical fields and cascading option narrowing.
//!
//! Matching is exact: case-sensitive and untrimmed. An empty value means "no constraint", the
//! same as leaving the field out.

use std::collections::BTreeSet;

use crate::dataset::{Dataset, FieldOptions, sorted_owned};
use crate::record::{Field, Record};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown filter field `{0}` (expected one of: drug, brand, formulation, indication, treatment_phase, hospital_type)")]
    UnknownField(String),
    #[error("filter field `{0}` given more than once")]
    DuplicateField(Field),
}

/// The chosen value (if any) for each filterable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    values: [Option<String>; 6],
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `field` to `value`; an empty value clears the constraint.
    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        self.values[field.index()] = if value.is_empty() { None } else { Some(value) };
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values[field.index()].as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Set fields in canonical order.
    pub fn constraints(&self) -> impl Iterator<Item = (Field, &str)> {
        Field::ALL
            .into_iter()
            .filter_map(|f| self.get(f).map(|v| (f, v)))
    }

    /// Builds a selection from raw `(name, value)` pairs, e.g. decoded query parameters.
    ///
    /// Unknown names and repeated names are rejected rather than ignored.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut selection = Self::new();
        let mut seen = [false; 6];
        for (name, value) in pairs {
            let name = name.as_ref();
            let field =
                Field::from_name(name).ok_or_else(|| FilterError::UnknownField(name.to_string()))?;
            if std::mem::replace(&mut seen[field.index()], true) {
                return Err(FilterError::DuplicateField(field));
            }
            selection.set(field, value);
        }
        Ok(selection)
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.constraints().all(|(f, v)| record.value(f) == v)
    }

    /// Fields whose constraint `record` violates, as a bit set indexed by `Field::index`.
    fn mismatches(&self, record: &Record) -> u8 {
        let mut bits = 0u8;
        for (field, value) in self.constraints() {
            if record.value(field) != value {
                bits |= 1 << field.index();
            }
        }
        bits
    }
}

/// Result of a search; "nothing matched" is an outcome, not an error.
#[derive(Debug, PartialEq, Eq)]
pub enum SearchOutcome<'a> {
    Found(Vec<&'a Record>),
    NoResults,
}

impl<'a> SearchOutcome<'a> {
    pub fn records(&self) -> &[&'a Record] {
        match self {
            SearchOutcome::Found(records) => records,
            SearchOutcome::NoResults => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SearchOutcome::NoResults)
    }
}

/// Records satisfying every constraint in `selection`, in dataset order.
pub fn match_records<'a>(dataset: &'a Dataset, selection: &Selection) -> SearchOutcome<'a> {
    let found: Vec<&Record> = dataset
        .records()
        .iter()
        .filter(|r| selection.matches(r))
        .collect();
    if found.is_empty() {
        SearchOutcome::NoResults
    } else {
        SearchOutcome::Found(found)
    }
}

/// For each field, the distinct values reachable under the *other* five constraints.
///
/// A record passes the sub-filter for field F exactly when every constraint it violates is F's
/// own, so one pass suffices: records with no violations feed every field, records with a
/// single violation feed only that field.
pub fn narrow(dataset: &Dataset, selection: &Selection) -> FieldOptions {
    if selection.is_empty() {
        return dataset.options().clone();
    }

    let mut sets: [BTreeSet<&str>; 6] = Default::default();
    for record in dataset.records() {
        let bits = selection.mismatches(record);
        if bits == 0 {
            for field in Field::ALL {
                sets[field.index()].insert(record.value(field));
            }
        } else if bits.is_power_of_two() {
            let field = Field::ALL[bits.trailing_zeros() as usize];
            sets[field.index()].insert(record.value(field));
        }
    }

    let mut out = FieldOptions::default();
    for field in Field::ALL {
        out.set(field, sorted_owned(&sets[field.index()]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::record;

    fn scenario() -> Dataset {
        Dataset::new(vec![record("A", "X"), record("A", "Y"), record("B", "X")])
    }

    fn brute_force_narrow(ds: &Dataset, sel: &Selection, field: Field) -> Vec<String> {
        let mut sub = sel.clone();
        sub.set(field, "");
        let set: BTreeSet<&str> = ds
            .records()
            .iter()
            .filter(|r| sub.matches(r))
            .map(|r| r.value(field))
            .collect();
        sorted_owned(&set)
    }

    #[test]
    fn drug_selection_matches_first_two_and_narrows_brands() {
        let ds = scenario();
        let sel = Selection::new().with(Field::Drug, "A");

        let found = match_records(&ds, &sel);
        assert_eq!(found.len(), 2);
        assert_eq!(found.records()[0], &ds.records()[0]);
        assert_eq!(found.records()[1], &ds.records()[1]);

        let options = narrow(&ds, &sel);
        assert_eq!(options.brands, vec!["X", "Y"]);
        assert_eq!(options.drugs, vec!["A", "B"]);
    }

    #[test]
    fn empty_selection_matches_everything_in_order() {
        let ds = scenario();
        let found = match_records(&ds, &Selection::new());
        let expected: Vec<&Record> = ds.records().iter().collect();
        assert_eq!(found, SearchOutcome::Found(expected));
        assert_eq!(narrow(&ds, &Selection::new()), *ds.options());
    }

    #[test]
    fn no_match_is_an_outcome() {
        let ds = scenario();
        let sel = Selection::new().with(Field::Drug, "B").with(Field::Brand, "Y");
        assert_eq!(match_records(&ds, &sel), SearchOutcome::NoResults);
        assert!(match_records(&ds, &sel).is_empty());

        // Each field is still narrowed by the other one alone.
        let options = narrow(&ds, &sel);
        assert_eq!(options.drugs, vec!["A"]);
        assert_eq!(options.brands, vec!["X"]);
        assert!(options.formulations.is_empty());
    }

    #[test]
    fn matching_is_case_sensitive_and_untrimmed() {
        let ds = scenario();
        assert!(match_records(&ds, &Selection::new().with(Field::Drug, "a")).is_empty());
        assert!(match_records(&ds, &Selection::new().with(Field::Drug, "A ")).is_empty());
    }

    #[test]
    fn empty_value_is_no_constraint() {
        let sel = Selection::new().with(Field::Drug, "A").with(Field::Drug, "");
        assert!(sel.is_empty());
    }

    #[test]
    fn empty_dataset_yields_empty_everything() {
        let ds = Dataset::empty();
        let sel = Selection::new().with(Field::Brand, "X");
        assert!(match_records(&ds, &sel).is_empty());
        let options = narrow(&ds, &sel);
        for field in Field::ALL {
            assert!(options.get(field).is_empty());
        }
    }

    #[test]
    fn narrow_agrees_with_per_field_subfilter() {
        let mut records = Vec::new();
        for (i, drug) in ["A", "B", "C"].into_iter().enumerate() {
            for (j, brand) in ["X", "Y"].into_iter().enumerate() {
                let mut r = record(drug, brand);
                r.indication = if (i + j) % 2 == 0 { "RA" } else { "PsA" }.to_string();
                r.hospital_type = if i == 2 { "Public" } else { "Private" }.to_string();
                records.push(r);
            }
        }
        let ds = Dataset::new(records);

        let selections = [
            Selection::new().with(Field::Drug, "A"),
            Selection::new().with(Field::Drug, "C").with(Field::Indication, "RA"),
            Selection::new()
                .with(Field::Brand, "Y")
                .with(Field::HospitalType, "Private")
                .with(Field::Indication, "PsA"),
            Selection::new().with(Field::Drug, "nope").with(Field::Brand, "X"),
        ];

        for sel in &selections {
            let options = narrow(&ds, sel);
            for field in Field::ALL {
                assert_eq!(
                    options.get(field),
                    brute_force_narrow(&ds, sel, field).as_slice(),
                    "field {field} under {sel:?}"
                );
            }
            assert_eq!(narrow(&ds, sel), options);
        }
    }

    #[test]
    fn selected_value_stays_reachable() {
        let ds = scenario();
        let sel = Selection::new().with(Field::Drug, "A").with(Field::Brand, "Y");
        let options = narrow(&ds, &sel);
        assert!(options.drugs.contains(&"A".to_string()));
        assert!(options.brands.contains(&"Y".to_string()));
    }

    #[test]
    fn every_match_satisfies_every_constraint() {
        let ds = scenario();
        let sel = Selection::new().with(Field::Brand, "X");
        for r in match_records(&ds, &sel).records() {
            assert!(sel.constraints().all(|(f, v)| r.value(f) == v));
        }
    }

    mod properties {
        use proptest::prelude::*;
        use proptest::test_runner::Config;

        use super::*;

        const VALUES: [&str; 3] = ["a", "b", "c"];
        // "z" never occurs in generated data.
        const SELECTABLE: [&str; 4] = ["a", "b", "c", "z"];

        fn value() -> impl Strategy<Value = String> {
            prop::sample::select(VALUES.to_vec()).prop_map(str::to_string)
        }

        fn dataset() -> impl Strategy<Value = Dataset> {
            let row = [value(), value(), value(), value(), value(), value()];
            prop::collection::vec(row, 0..12).prop_map(|rows| {
                let records = rows
                    .into_iter()
                    .enumerate()
                    .map(|(i, [drug, brand, formulation, indication, phase, hospital])| {
                        let mut r = record(&drug, &brand);
                        r.pbs_code = format!("{i:05}");
                        r.formulation = formulation;
                        r.indication = indication;
                        r.treatment_phase = phase;
                        r.hospital_type = hospital;
                        r
                    })
                    .collect();
                Dataset::new(records)
            })
        }

        fn selection() -> impl Strategy<Value = Selection> {
            let slot = || {
                proptest::option::weighted(0.4, prop::sample::select(SELECTABLE.to_vec()))
            };
            [slot(), slot(), slot(), slot(), slot(), slot()].prop_map(|slots| {
                let mut sel = Selection::new();
                for (field, value) in Field::ALL.into_iter().zip(slots) {
                    if let Some(v) = value {
                        sel.set(field, v);
                    }
                }
                sel
            })
        }

        proptest! {
            #![proptest_config(Config::with_cases(256))]

            #[test]
            fn matches_are_an_ordered_subset_satisfying_every_constraint(
                ds in dataset(),
                sel in selection()
            ) {
                let found = match_records(&ds, &sel);
                let expected: Vec<&Record> =
                    ds.records().iter().filter(|r| sel.matches(r)).collect();
                prop_assert_eq!(found.records(), expected.as_slice());
                for r in found.records() {
                    prop_assert!(sel.constraints().all(|(f, v)| r.value(f) == v));
                }
                prop_assert_eq!(found.is_empty(), found == SearchOutcome::NoResults);
            }

            #[test]
            fn empty_selection_returns_all_records_and_full_options(ds in dataset()) {
                let found = match_records(&ds, &Selection::new());
                let all: Vec<&Record> = ds.records().iter().collect();
                prop_assert_eq!(found.records(), all.as_slice());
                prop_assert_eq!(&narrow(&ds, &Selection::new()), ds.options());
            }

            #[test]
            fn narrow_equals_per_field_subfilter(ds in dataset(), sel in selection()) {
                let options = narrow(&ds, &sel);
                for field in Field::ALL {
                    let expected = brute_force_narrow(&ds, &sel, field);
                    prop_assert_eq!(options.get(field), expected.as_slice(), "field {}", field);
                }
            }

            #[test]
            fn selected_value_stays_reachable(ds in dataset(), sel in selection()) {
                let options = narrow(&ds, &sel);
                for (field, value) in sel.constraints() {
                    let mut others = sel.clone();
                    others.set(field, "");
                    let rest: Vec<&Record> =
                        ds.records().iter().filter(|r| others.matches(r)).collect();
                    if rest.iter().any(|r| r.value(field) == value) {
                        prop_assert!(options.get(field).iter().any(|v| v == value));
                    }
                    prop_assert_eq!(options.get(field).is_empty(), rest.is_empty());
                }
            }

            #[test]
            fn narrow_is_idempotent(ds in dataset(), sel in selection()) {
                prop_assert_eq!(narrow(&ds, &sel), narrow(&ds, &sel));
            }
        }
    }

    #[test]
    fn from_pairs_rejects_unknown_and_duplicate_fields() {
        let sel = Selection::from_pairs([("drug", "A"), ("treatment_phase", "")]).unwrap();
        assert_eq!(sel.get(Field::Drug), Some("A"));
        assert_eq!(sel.get(Field::TreatmentPhase), None);

        assert_eq!(
            Selection::from_pairs([("colour", "red")]),
            Err(FilterError::UnknownField("colour".to_string()))
        );
        assert_eq!(
            Selection::from_pairs([("brand", "X"), ("brand", "Y")]),
            Err(FilterError::DuplicateField(Field::Brand))
        );
    }
}
