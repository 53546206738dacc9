//! Dependency ledger.
//!
//! Records the version and size of every shared structure the first time a
//! module mentions it. Later modules must agree with that first record.

use serde::Serialize;

use crate::error::DependencyMismatch;

/// An agreed (name, version, size) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyRecord {
    pub name: String,
    pub version: String,
    pub size: usize,
}

impl std::fmt::Display for DependencyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dependency({}) version({}) size({})",
            self.name, self.version, self.size
        )
    }
}

/// First-writer-wins store of dependency records, in declaration order.
#[derive(Debug, Default)]
pub struct DependencyLedger {
    records: Vec<DependencyRecord>,
}

impl DependencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record unless one with the same name exists.
    pub fn declare(&mut self, name: &str, version: &str, size: usize) {
        if self.get(name).is_some() {
            return;
        }
        self.records.push(DependencyRecord {
            name: name.to_string(),
            version: version.to_string(),
            size,
        });
    }

    /// Check a triple against the ledger, recording it if it is new.
    pub fn check(
        &mut self,
        name: &str,
        version: &str,
        size: usize,
    ) -> Result<(), DependencyMismatch> {
        let Some(record) = self.get(name) else {
            self.declare(name, version, size);
            return Ok(());
        };

        if record.version != version {
            return Err(DependencyMismatch::Version {
                name: name.to_string(),
                found: version.to_string(),
                expected: record.version.clone(),
            });
        }
        if record.size != size {
            return Err(DependencyMismatch::Size {
                name: name.to_string(),
                found: size,
                expected: record.size,
            });
        }
        Ok(())
    }

    /// Look up a record by name.
    pub fn get(&self, name: &str) -> Option<&DependencyRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// All records in declaration order.
    pub fn records(&self) -> &[DependencyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
