//! First-name to gender reference table used by the contributors-gender metric.

use crate::error::{MetricsError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct NameGenderRow {
    name: String,
    gender: String,
}

/// Exact-match lookup from first name to gender label.
#[derive(Clone, Debug, Default)]
pub struct NameGenderTable {
    genders: HashMap<String, String>,
}

impl NameGenderTable {
    /// Loads a CSV with `name` and `gender` columns. Extra columns are ignored; on duplicate
    /// names the last row wins.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            MetricsError::Config(format!("cannot open {}: {e}", path.display()))
        })?;
        Self::from_reader(file)
            .map_err(|e| MetricsError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_reader<R: Read>(reader: R) -> std::result::Result<Self, csv::Error> {
        let mut genders = HashMap::new();
        for row in csv::Reader::from_reader(reader).deserialize() {
            let row: NameGenderRow = row?;
            genders.insert(row.name, row.gender);
        }
        Ok(Self { genders })
    }

    pub fn gender_of(&self, first_name: &str) -> Option<&str> {
        self.genders.get(first_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.genders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genders.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for NameGenderTable {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self {
            genders: iter
                .into_iter()
                .map(|(name, gender)| (name.to_string(), gender.to_string()))
                .collect(),
        }
    }
}
