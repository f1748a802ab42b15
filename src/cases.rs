use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// One labeled puzzle: its statement, input and expected answer
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Case {
    pub name: String,
    pub year: u32,
    pub day: u32,
    pub part: u32,
    pub task: String,
    pub input: String,
    #[serde(deserialize_with = "answer_as_string")]
    pub answer: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CaseSummary {
    pub name: String,
    pub year: u32,
    pub day: u32,
    pub part: u32,
}

/// Listing filters; every present field must match
#[derive(Deserialize, Debug, Default, Clone, Copy)]
pub struct CaseFilter {
    pub year: Option<u32>,
    pub day: Option<u32>,
    pub part: Option<u32>,
}

impl CaseFilter {
    fn matches(&self, case: &Case) -> bool {
        self.year.is_none_or(|y| y == case.year)
            && self.day.is_none_or(|d| d == case.day)
            && self.part.is_none_or(|p| p == case.part)
    }
}

impl From<&Case> for CaseSummary {
    fn from(case: &Case) -> Self {
        Self {
            name: case.name.clone(),
            year: case.year,
            day: case.day,
            part: case.part,
        }
    }
}

// Answers are stored as text no matter how the line spelled them
fn answer_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// All cases loaded from a line-delimited JSON file, read-only after load
#[derive(Debug, Default)]
pub struct CaseRepository {
    cases: Vec<Case>,
    by_name: HashMap<String, usize>,
}

impl CaseRepository {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let repository = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to load cases from {}", path.display()))?;

        log::info!("Loaded {} cases from {}", repository.len(), path.display());
        Ok(repository)
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut cases = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let case: Case = serde_json::from_str(line)
                .with_context(|| format!("Malformed case on line {}", idx + 1))?;
            cases.push(case);
        }
        Ok(Self::from_cases(cases))
    }

    /// Later cases shadow earlier ones with the same name for `get`
    pub fn from_cases(cases: Vec<Case>) -> Self {
        let by_name = cases
            .iter()
            .enumerate()
            .map(|(idx, case)| (case.name.clone(), idx))
            .collect();
        Self { cases, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Case> {
        self.by_name.get(name).map(|&idx| &self.cases[idx])
    }

    pub fn list(&self, filter: &CaseFilter) -> Vec<CaseSummary> {
        self.cases
            .iter()
            .filter(|c| filter.matches(c))
            .map(CaseSummary::from)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}
