use std::collections::HashSet;

use shared::domain::{Doctor, DoctorId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("doctor registry is empty")]
    Empty,
    #[error("doctor id {0} appears more than once")]
    DuplicateId(DoctorId),
}

/// Doctors offered at this kiosk, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorRegistry {
    doctors: Vec<Doctor>,
}

impl DoctorRegistry {
    pub fn new(doctors: Vec<Doctor>) -> Result<Self, RegistryError> {
        if doctors.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for doctor in &doctors {
            if !seen.insert(doctor.id) {
                return Err(RegistryError::DuplicateId(doctor.id));
            }
        }
        Ok(Self { doctors })
    }

    pub fn doctors(&self) -> &[Doctor] {
        &self.doctors
    }

    pub fn get(&self, id: DoctorId) -> Option<&Doctor> {
        self.doctors.iter().find(|doctor| doctor.id == id)
    }
}

impl Default for DoctorRegistry {
    fn default() -> Self {
        Self {
            doctors: vec![
                Doctor::new(1, "Dr. Vijay Pathak (Cardiologist)", 200, "8 years"),
                Doctor::new(2, "Dr. Sanjay Saran (Endocrinologist)", 500, "15 years"),
                Doctor::new(3, "Dr. Pankaj Beniwal (Nephrologist)", 450, "10 years"),
                Doctor::new(4, "Dr. Smriti Bhargava (Obstetrician)", 300, "7 years"),
                Doctor::new(5, "Dr. Pawan Singhal (ENT Surgeon)", 250, "12 years"),
            ],
        }
    }
}
