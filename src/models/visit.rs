use serde::{ Serialize, Deserialize };

/// Fields a clinician submits after a patient visit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Visit {
    pub patient_name: String,
    pub date_of_visit: String,
    pub notes: String,
}

impl Visit {
    /// Returns the name of the first blank field, if any.
    pub fn first_missing_field(&self) -> Option<&'static str> {
        [
            ("patient_name", &self.patient_name),
            ("date_of_visit", &self.date_of_visit),
            ("notes", &self.notes),
        ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
    }
}
